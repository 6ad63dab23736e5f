//! Layout options — page geometry, spacing and fonts.
//!
//! Every field has a default, so a JSON configuration only needs to name
//! what it overrides:
//!
//! ```
//! let opts = meiscore::LayoutOptions::from_json(r#"{ "page_width": 600 }"#).unwrap();
//! assert_eq!(opts.page_width, 600.0);
//! assert!(opts.auto_system_breaks);
//! ```

use serde::{Deserialize, Serialize};

/// Font used for a class of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontSpec {
    pub family: String,
    pub size: f64,
    /// CSS font weight: "normal", "bold"
    pub weight: String,
    /// CSS font style: "normal", "italic"
    pub style: String,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: "Times New Roman, serif".into(),
            size: 13.0,
            weight: "normal".into(),
            style: "normal".into(),
        }
    }
}

impl FontSpec {
    pub fn new(size: f64, weight: &str, style: &str) -> Self {
        Self {
            size,
            weight: weight.into(),
            style: style.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// SVG width in user units
    pub page_width: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub margin_top: f64,
    /// Vertical distance from one staff's top line to the next staff's top line
    pub staff_spacing: f64,
    /// Extra vertical space between systems
    pub system_spacing: f64,
    /// Break systems when measures no longer fit the page width
    pub auto_system_breaks: bool,
    /// Dynamics, directives
    pub annotation_font: FontSpec,
    pub lyrics_font: FontSpec,
    /// Tempo marks and rehearsal sections
    pub tempo_font: FontSpec,
    /// Hyphens are only drawn between syllables closer than this
    pub max_hyphen_distance: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            page_width: 820.0,
            margin_left: 50.0,
            margin_right: 30.0,
            margin_top: 40.0,
            staff_spacing: 90.0,
            system_spacing: 50.0,
            auto_system_breaks: true,
            annotation_font: FontSpec::new(14.0, "normal", "italic"),
            lyrics_font: FontSpec::new(13.0, "normal", "normal"),
            tempo_font: FontSpec::new(13.0, "bold", "normal"),
            max_hyphen_distance: 100.0,
        }
    }
}

impl LayoutOptions {
    /// Parse options from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Horizontal space available to a system.
    pub fn content_width(&self) -> f64 {
        (self.page_width - self.margin_left - self.margin_right).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let opts = LayoutOptions::from_json(
            r#"{ "auto_system_breaks": false, "lyrics_font": { "size": 10 } }"#,
        )
        .unwrap();
        assert!(!opts.auto_system_breaks);
        assert_eq!(opts.lyrics_font.size, 10.0);
        assert_eq!(opts.lyrics_font.weight, "normal");
        assert_eq!(opts.page_width, 820.0);
    }

    #[test]
    fn content_width_subtracts_margins() {
        let opts = LayoutOptions::default();
        assert_eq!(opts.content_width(), 740.0);
    }
}
