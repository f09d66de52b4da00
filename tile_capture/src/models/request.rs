//! What the renderer is asked to capture.

use serde::{Deserialize, Serialize};

use super::geo::LatLng;

/// Browser viewport the renderer should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// One render call: a fully expanded map URL and its viewport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub url: String,
    pub viewport: Viewport,
}

/// Map URL with `{lat}` and `{lng}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// True when both placeholders are present.
    pub fn is_complete(&self) -> bool {
        self.0.contains("{lat}") && self.0.contains("{lng}")
    }

    /// Substitute the tile center, six decimal places (about 0.1 m).
    pub fn expand(&self, center: LatLng) -> String {
        self.0
            .replace("{lat}", &format!("{:.6}", center.lat))
            .replace("{lng}", &format!("{:.6}", center.lng))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_both_placeholders() {
        let t = UrlTemplate::new("https://maps.example/@{lat},{lng},15z/data=!5m1!1e1");
        assert!(t.is_complete());
        assert_eq!(
            t.expand(LatLng::new(26.985059, 75.6588)),
            "https://maps.example/@26.985059,75.658800,15z/data=!5m1!1e1"
        );
        assert!(!UrlTemplate::new("https://maps.example/@{lat}").is_complete());
    }
}
