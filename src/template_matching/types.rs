/// Template matching data types

/// Where a template was found in a frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchResult {
    /// Center X coordinate in the frame
    pub x: u32,
    /// Center Y coordinate in the frame
    pub y: u32,
    /// Matched width (template width times `scale`)
    pub width: u32,
    /// Matched height (template height times `scale`)
    pub height: u32,
    /// Match confidence (0.0-1.0)
    pub confidence: f32,
    /// Top-left anchor of the matched window
    pub top_left: (u32, u32),
    /// Template scale the match was found at
    pub scale: f32,
}

impl MatchResult {
    pub(crate) fn at(top_left: (u32, u32), width: u32, height: u32, confidence: f32, scale: f32) -> Self {
        Self {
            x: top_left.0 + width / 2,
            y: top_left.1 + height / 2,
            width,
            height,
            confidence,
            top_left,
            scale,
        }
    }

    /// Format match as string with confidence percentage
    pub fn describe(&self, name: &str) -> String {
        let confidence_pct = (self.confidence * 100.0) as u32;
        if (self.scale - 1.0).abs() < f32::EPSILON {
            format!("{name} at ({},{}) - {confidence_pct}%", self.x, self.y)
        } else {
            format!(
                "{name} at ({},{}) x{:.1} - {confidence_pct}%",
                self.x, self.y, self.scale
            )
        }
    }
}
