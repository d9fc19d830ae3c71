//! URL classification: which pages the reader may touch, and what to tell
//! the user when a page never answers.

use serde::Serialize;
use url::Url;

use crate::error::UserCondition;
use crate::settings::RuntimeSettings;

const RESTRICTED_SCHEMES: [&str; 10] = [
    "chrome",
    "chrome-extension",
    "edge",
    "about",
    "moz-extension",
    "view-source",
    "devtools",
    "brave",
    "opera",
    "vivaldi",
];

/// Extension stores refuse content scripts on every browser.
const STORE_PAGES: [(&str, &str); 3] = [
    ("chrome.google.com", "/webstore"),
    ("chromewebstore.google.com", "/"),
    ("addons.mozilla.org", "/"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PageCategory {
    Normal,
    Restricted,
    FileSystemUnauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    pub file_access_granted: bool,
}

impl From<&RuntimeSettings> for HostCapabilities {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            file_access_granted: settings.file_access_effective(),
        }
    }
}

pub fn classify(url: &str, caps: HostCapabilities) -> PageCategory {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return PageCategory::Restricted;
    };

    if is_restricted(&parsed) {
        return PageCategory::Restricted;
    }

    if parsed.scheme() == "file" && !caps.file_access_granted {
        return PageCategory::FileSystemUnauthorized;
    }

    PageCategory::Normal
}

fn is_restricted(url: &Url) -> bool {
    if RESTRICTED_SCHEMES.contains(&url.scheme()) {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    STORE_PAGES
        .iter()
        .any(|(store_host, path)| host == *store_host && url.path().starts_with(path))
}

/// `scheme://host[:port]` for web pages, `file://` for local files, and the
/// trimmed input itself when it does not parse.
pub fn origin_of(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(parsed) if parsed.scheme() == "file" => "file://".to_string(),
        Ok(parsed) => match parsed.origin() {
            origin @ url::Origin::Tuple(..) => origin.ascii_serialization(),
            url::Origin::Opaque(_) => format!("{}:", parsed.scheme()),
        },
        Err(_) => trimmed.to_string(),
    }
}

/// What to show for a page that never acknowledged. A missing file grant
/// wins over an unsupported page, which wins over a plain detection miss.
pub fn diagnose(url: &str, caps: HostCapabilities) -> UserCondition {
    match classify(url, caps) {
        PageCategory::FileSystemUnauthorized => UserCondition::FileAccessRequired,
        PageCategory::Restricted => UserCondition::PageNotSupported,
        PageCategory::Normal => UserCondition::PageNotDetected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_FILES: HostCapabilities = HostCapabilities {
        file_access_granted: false,
    };

    #[test]
    fn internal_pages_are_restricted() {
        for url in [
            "chrome://settings",
            "chrome-extension://abc/popup.html",
            "about:blank",
            "edge://flags",
            "view-source:https://example.com",
            "https://chromewebstore.google.com/detail/x",
            "https://chrome.google.com/webstore/category/extensions",
            "not a url",
        ] {
            assert_eq!(classify(url, NO_FILES), PageCategory::Restricted, "{url}");
        }
        assert_eq!(
            classify("https://chrome.google.com/search", NO_FILES),
            PageCategory::Normal
        );
    }

    #[test]
    fn file_pages_need_the_grant() {
        let url = "file:///home/me/notes.html";
        assert_eq!(classify(url, NO_FILES), PageCategory::FileSystemUnauthorized);
        assert_eq!(
            classify(
                url,
                HostCapabilities {
                    file_access_granted: true
                }
            ),
            PageCategory::Normal
        );
    }

    #[test]
    fn diagnosis_follows_priority() {
        assert_eq!(
            diagnose("file:///tmp/a.html", NO_FILES),
            UserCondition::FileAccessRequired
        );
        assert_eq!(
            diagnose("chrome://extensions", NO_FILES),
            UserCondition::PageNotSupported
        );
        assert_eq!(
            diagnose("https://example.com/a", NO_FILES),
            UserCondition::PageNotDetected
        );
    }

    #[test]
    fn origins_are_normalised() {
        assert_eq!(origin_of("https://Example.com:443/a?b#c"), "https://example.com");
        assert_eq!(origin_of("http://localhost:8080/x"), "http://localhost:8080");
        assert_eq!(origin_of("file:///tmp/a.html"), "file://");
        assert_eq!(origin_of("  garbage "), "garbage");
    }

    #[test]
    fn firefox_needs_no_file_grant() {
        let settings = RuntimeSettings {
            target: crate::settings::BrowserTarget::Firefox,
            ..RuntimeSettings::default()
        };
        assert_eq!(
            classify("file:///tmp/a.html", HostCapabilities::from(&settings)),
            PageCategory::Normal
        );
    }
}
