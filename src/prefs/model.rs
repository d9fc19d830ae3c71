//! Preference data models.
//!
//! `Preferences` is a complete, immutable snapshot. Site overrides are
//! stored as `PartialPreferences` and merged over the global record at read
//! time. Field names serialize in camelCase to stay compatible with records
//! written by the extension's settings page.

use serde::{Deserialize, Serialize};

use crate::config::{DisplayColorMode, SaccadeColor, SaccadeStyle};
use crate::error::UserCondition;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Local,
    Reset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
            Scope::Reset => "reset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Some(Scope::Global),
            "local" | "site" => Some(Scope::Local),
            "reset" => Some(Scope::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub saccades_interval: u8,
    pub fixation_strength: u8,
    pub fixation_edge_opacity: u8,
    pub saccades_color: SaccadeColor,
    pub saccades_style: SaccadeStyle,
    pub line_height: f32,
    pub on_page_load: bool,
    pub scope: Scope,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            saccades_interval: 0,
            fixation_strength: 2,
            fixation_edge_opacity: 80,
            saccades_color: SaccadeColor::Original,
            saccades_style: SaccadeStyle::Bold600,
            line_height: 1.0,
            on_page_load: false,
            scope: Scope::Global,
        }
    }
}

/// Fields the settings page edits individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceField {
    SaccadesInterval,
    FixationStrength,
    FixationEdgeOpacity,
    SaccadesColor,
    SaccadesStyle,
    LineHeight,
    OnPageLoad,
}

impl PreferenceField {
    pub const ALL: [PreferenceField; 7] = [
        PreferenceField::SaccadesInterval,
        PreferenceField::FixationStrength,
        PreferenceField::FixationEdgeOpacity,
        PreferenceField::SaccadesColor,
        PreferenceField::SaccadesStyle,
        PreferenceField::LineHeight,
        PreferenceField::OnPageLoad,
    ];
}

impl Preferences {
    /// True when `field` holds the recommended default ("Optimal" in the UI).
    pub fn is_optimal(&self, field: PreferenceField) -> bool {
        let optimal = Preferences::default();
        match field {
            PreferenceField::SaccadesInterval => self.saccades_interval == optimal.saccades_interval,
            PreferenceField::FixationStrength => self.fixation_strength == optimal.fixation_strength,
            PreferenceField::FixationEdgeOpacity => {
                self.fixation_edge_opacity == optimal.fixation_edge_opacity
            }
            PreferenceField::SaccadesColor => self.saccades_color == optimal.saccades_color,
            PreferenceField::SaccadesStyle => self.saccades_style == optimal.saccades_style,
            PreferenceField::LineHeight => {
                (self.line_height - optimal.line_height).abs() < f32::EPSILON
            }
            PreferenceField::OnPageLoad => self.on_page_load == optimal.on_page_load,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// A sparse set of preference values: a site override, or an edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saccades_interval: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixation_strength: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixation_edge_opacity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saccades_color: Option<SaccadeColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saccades_style: Option<SaccadeStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_page_load: Option<bool>,
}

impl PartialPreferences {
    pub fn is_empty(&self) -> bool {
        self == &PartialPreferences::default()
    }

    /// Overlays the set fields of `self` on `base`.
    pub fn apply_to(&self, base: &Preferences) -> Preferences {
        Preferences {
            saccades_interval: self.saccades_interval.unwrap_or(base.saccades_interval),
            fixation_strength: self.fixation_strength.unwrap_or(base.fixation_strength),
            fixation_edge_opacity: self
                .fixation_edge_opacity
                .unwrap_or(base.fixation_edge_opacity),
            saccades_color: self.saccades_color.unwrap_or(base.saccades_color),
            saccades_style: self.saccades_style.unwrap_or(base.saccades_style),
            line_height: self.line_height.unwrap_or(base.line_height),
            on_page_load: self.on_page_load.unwrap_or(base.on_page_load),
            scope: base.scope,
        }
    }

    /// Later values win: fields set in `newer` replace those in `self`.
    pub fn merge(&mut self, newer: &PartialPreferences) {
        if newer.saccades_interval.is_some() {
            self.saccades_interval = newer.saccades_interval;
        }
        if newer.fixation_strength.is_some() {
            self.fixation_strength = newer.fixation_strength;
        }
        if newer.fixation_edge_opacity.is_some() {
            self.fixation_edge_opacity = newer.fixation_edge_opacity;
        }
        if newer.saccades_color.is_some() {
            self.saccades_color = newer.saccades_color;
        }
        if newer.saccades_style.is_some() {
            self.saccades_style = newer.saccades_style;
        }
        if newer.line_height.is_some() {
            self.line_height = newer.line_height;
        }
        if newer.on_page_load.is_some() {
            self.on_page_load = newer.on_page_load;
        }
    }
}

impl From<&Preferences> for PartialPreferences {
    fn from(prefs: &Preferences) -> Self {
        Self {
            saccades_interval: Some(prefs.saccades_interval),
            fixation_strength: Some(prefs.fixation_strength),
            fixation_edge_opacity: Some(prefs.fixation_edge_opacity),
            saccades_color: Some(prefs.saccades_color),
            saccades_style: Some(prefs.saccades_style),
            line_height: Some(prefs.line_height),
            on_page_load: Some(prefs.on_page_load),
        }
    }
}

/// An edit submitted by the settings page: which record it targets and
/// which fields change.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceUpdate {
    pub scope: Scope,
    pub changes: PartialPreferences,
}

impl PreferenceUpdate {
    pub fn new(scope: Scope, changes: PartialPreferences) -> Self {
        Self { scope, changes }
    }

    pub fn reset() -> Self {
        Self::new(Scope::Reset, PartialPreferences::default())
    }
}

impl From<Preferences> for PreferenceUpdate {
    /// A full snapshot edit, targeting the snapshot's own scope.
    fn from(prefs: Preferences) -> Self {
        Self::new(prefs.scope, PartialPreferences::from(&prefs))
    }
}

/// Preferences as resolved for one origin.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePreferences {
    /// `scope` is `Local` when a site override took part in the merge.
    pub prefs: Preferences,
    /// Set when the store could not be read and defaults are in effect.
    pub condition: Option<UserCondition>,
}

impl EffectivePreferences {
    pub fn resolved(prefs: Preferences) -> Self {
        Self {
            prefs,
            condition: None,
        }
    }

    pub fn fallback() -> Self {
        Self {
            prefs: Preferences::default(),
            condition: Some(UserCondition::StoreUnavailable),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.condition.is_some()
    }
}

/// App-level settings, independent of any origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub display_color_mode: DisplayColorMode,
    /// Whether the popup renders its own labels with the reading effect.
    pub transform_control_panel_text: bool,
}

/// Validation and normalisation of incoming edits.
pub mod validation {
    use super::PartialPreferences;
    use crate::config::{
        FIXATION_OPACITY_STEP, MAX_FIXATION_PARTS, MAX_LINE_HEIGHT, MAX_SACCADES_INTERVAL,
        MIN_LINE_HEIGHT,
    };
    use crate::error::{ReaderError, Result};

    /// Rejects out-of-range sliders; snaps opacity to its step and clamps
    /// line height into range.
    pub fn normalize(mut changes: PartialPreferences) -> Result<PartialPreferences> {
        if let Some(interval) = changes.saccades_interval {
            if interval >= MAX_SACCADES_INTERVAL {
                return Err(ReaderError::invalid(
                    "saccadesInterval",
                    format!("{interval} is not below {MAX_SACCADES_INTERVAL}"),
                ));
            }
        }

        if let Some(strength) = changes.fixation_strength {
            if !(1..=MAX_FIXATION_PARTS).contains(&strength) {
                return Err(ReaderError::invalid(
                    "fixationStrength",
                    format!("{strength} is outside 1..={MAX_FIXATION_PARTS}"),
                ));
            }
        }

        if let Some(opacity) = changes.fixation_edge_opacity {
            if opacity > 100 {
                return Err(ReaderError::invalid(
                    "fixationEdgeOpacity",
                    format!("{opacity} exceeds 100"),
                ));
            }
            let step = u16::from(FIXATION_OPACITY_STEP);
            let snapped = (u16::from(opacity) + step / 2) / step * step;
            changes.fixation_edge_opacity = Some(snapped.min(100) as u8);
        }

        if let Some(line_height) = changes.line_height {
            if !line_height.is_finite() {
                return Err(ReaderError::invalid("lineHeight", "not a finite number"));
            }
            changes.line_height = Some(line_height.clamp(MIN_LINE_HEIGHT, MAX_LINE_HEIGHT));
        }

        Ok(changes)
    }
}
