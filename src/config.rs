//! Compile-time configuration surface: slider bounds, selectable colors and
//! styles, display color modes.

use serde::{Deserialize, Serialize};

/// Exclusive upper bound of `saccades_interval` (slider shows 0..=4).
pub const MAX_SACCADES_INTERVAL: u8 = 5;
/// Upper bound of `fixation_strength`; also the divisor base of the prefix formula.
pub const MAX_FIXATION_PARTS: u8 = 4;
pub const FIXATION_OPACITY_STEP: u8 = 10;
pub const LINE_HEIGHT_STEP: f32 = 0.5;
pub const MIN_LINE_HEIGHT: f32 = 1.0;
pub const MAX_LINE_HEIGHT: f32 = 4.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SaccadeColor {
    /// Keep the page's own text color.
    #[default]
    #[serde(rename = "")]
    Original,
    #[serde(rename = "light-100")]
    Light100,
    #[serde(rename = "light-200")]
    Light200,
    #[serde(rename = "dark-100")]
    Dark100,
    #[serde(rename = "dark-200")]
    Dark200,
}

impl SaccadeColor {
    pub const ALL: [SaccadeColor; 5] = [
        SaccadeColor::Original,
        SaccadeColor::Light100,
        SaccadeColor::Light200,
        SaccadeColor::Dark100,
        SaccadeColor::Dark200,
    ];

    /// Attribute value written onto the document root.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaccadeColor::Original => "",
            SaccadeColor::Light100 => "light-100",
            SaccadeColor::Light200 => "light-200",
            SaccadeColor::Dark100 => "dark-100",
            SaccadeColor::Dark200 => "dark-200",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SaccadeColor::Original => "Original",
            SaccadeColor::Light100 => "Light-100",
            SaccadeColor::Light200 => "Light-200",
            SaccadeColor::Dark100 => "Dark-100",
            SaccadeColor::Dark200 => "Dark-200",
        }
    }

    /// Accepts either the attribute value or the label, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|color| {
            color.as_str().eq_ignore_ascii_case(value) || color.label().eq_ignore_ascii_case(value)
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SaccadeStyle {
    #[serde(rename = "bold-400")]
    Bold400,
    #[serde(rename = "bold-500")]
    Bold500,
    #[default]
    #[serde(rename = "bold-600")]
    Bold600,
    #[serde(rename = "bold-700")]
    Bold700,
    #[serde(rename = "bold-800")]
    Bold800,
    #[serde(rename = "bold-900")]
    Bold900,
    #[serde(rename = "solid-line")]
    SolidLine,
    #[serde(rename = "dashed-line")]
    DashedLine,
    #[serde(rename = "dotted-line")]
    DottedLine,
}

impl SaccadeStyle {
    pub const ALL: [SaccadeStyle; 9] = [
        SaccadeStyle::Bold400,
        SaccadeStyle::Bold500,
        SaccadeStyle::Bold600,
        SaccadeStyle::Bold700,
        SaccadeStyle::Bold800,
        SaccadeStyle::Bold900,
        SaccadeStyle::SolidLine,
        SaccadeStyle::DashedLine,
        SaccadeStyle::DottedLine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SaccadeStyle::Bold400 => "bold-400",
            SaccadeStyle::Bold500 => "bold-500",
            SaccadeStyle::Bold600 => "bold-600",
            SaccadeStyle::Bold700 => "bold-700",
            SaccadeStyle::Bold800 => "bold-800",
            SaccadeStyle::Bold900 => "bold-900",
            SaccadeStyle::SolidLine => "solid-line",
            SaccadeStyle::DashedLine => "dashed-line",
            SaccadeStyle::DottedLine => "dotted-line",
        }
    }

    /// Underline styles decorate instead of changing font weight.
    pub fn is_line(&self) -> bool {
        matches!(
            self,
            SaccadeStyle::SolidLine | SaccadeStyle::DashedLine | SaccadeStyle::DottedLine
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayColorMode {
    #[default]
    Light,
    Dark,
}

/// Popup theme transitions: each mode toggles to the next entry.
pub const COLOR_MODE_STATE_TRANSITIONS: [(DisplayColorMode, DisplayColorMode); 2] = [
    (DisplayColorMode::Light, DisplayColorMode::Dark),
    (DisplayColorMode::Dark, DisplayColorMode::Light),
];

impl DisplayColorMode {
    pub fn next(self) -> Self {
        COLOR_MODE_STATE_TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .unwrap_or_default()
    }
}
