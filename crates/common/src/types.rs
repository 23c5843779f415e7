//! Core shared types: stream kinds and timestamp helpers.
//!
//! Timestamps are `f64` seconds throughout the engine; an unknown timestamp
//! is `None`. The helpers below implement the "if one side is unknown, pick
//! the other" semantics that timestamp merging needs everywhere.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of an elementary stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    /// Number of distinct stream kinds (for per-type tables).
    pub const COUNT: usize = 3;

    /// Short name used in log messages.
    pub fn name(self) -> &'static str {
        match self {
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Subtitle => "sub",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Smaller of two optional timestamps. If one side is unknown, the other
/// wins; two unknowns stay unknown.
pub fn pts_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Larger of two optional timestamps; unknown sides lose.
pub fn pts_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Add an offset to a timestamp, keeping unknown timestamps unknown.
pub fn add_pts(ts: Option<f64>, offset: f64) -> Option<f64> {
    ts.map(|t| t + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_min_prefers_known_values() {
        assert_eq!(pts_min(Some(1.0), Some(2.0)), Some(1.0));
        assert_eq!(pts_min(None, Some(2.0)), Some(2.0));
        assert_eq!(pts_min(Some(1.0), None), Some(1.0));
        assert_eq!(pts_min(None, None), None);
    }

    #[test]
    fn pts_max_prefers_known_values() {
        assert_eq!(pts_max(Some(1.0), Some(2.0)), Some(2.0));
        assert_eq!(pts_max(None, Some(2.0)), Some(2.0));
        assert_eq!(pts_max(Some(1.0), None), Some(1.0));
        assert_eq!(pts_max(None, None), None);
    }

    #[test]
    fn add_pts_keeps_unknown() {
        assert_eq!(add_pts(Some(1.5), 0.5), Some(2.0));
        assert_eq!(add_pts(None, 0.5), None);
    }
}
