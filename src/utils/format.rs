//! Formatting utilities for display values.

/// Convert a 0.0-1.0 ratio to a percentage, clamped to [0, 100].
pub fn ratio_to_percent(ratio: f32) -> f32 {
    (ratio * 100.0).clamp(0.0, 100.0)
}
