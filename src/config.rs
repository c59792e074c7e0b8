//! Tracker configuration structs
//!
//! Every recognized tuning parameter is an explicit, typed field with a
//! default. The configuration is caller-owned and passed by reference; this
//! crate performs no file I/O (loading a YAML file into `TrackerConfig` is
//! the driver's job).

use crate::error::{Result, TrackError};
use serde::{Deserialize, Serialize};

/// Noise weights for the bounding-box Kalman filter
///
/// Both weights scale uncertainty relative to the current box size: a large
/// (near) box tolerates more absolute pixel noise than a small (far) one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanParams {
    /// Standard deviation weight for position/size terms
    pub std_weight_position: f64,
    /// Standard deviation weight for velocity terms
    pub std_weight_velocity: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }
}

/// Configuration for the association pipeline
///
/// Field set and defaults follow the standard BoT-SORT parameterization.
/// The matching thresholds are consumed by the external lifecycle manager;
/// they are enumerated here so the full parameter surface is statically
/// validated in one place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Score threshold for the first (high-confidence) association pass
    pub track_high_thresh: f32,
    /// Score threshold for the second (recovery) association pass
    pub track_low_thresh: f32,
    /// Minimum score to start a new track from an unmatched detection
    pub new_track_thresh: f32,
    /// Frames to keep a lost track alive, scaled by frame rate
    pub track_buffer: u32,
    /// Maximum matching cost accepted by the assignment solver
    pub match_thresh: f32,
    /// Whether geometric costs are fused with detection scores
    pub fuse_score: bool,
    /// IoU-distance gate for considering an appearance match at all
    pub proximity_thresh: f32,
    /// Embedding-distance gate for appearance matches
    pub appearance_thresh: f32,
    /// Whether appearance embeddings are used for re-identification
    pub with_reid: bool,
    /// Input frame rate, used to scale `track_buffer`
    pub frame_rate: u32,
    /// Kalman filter noise weights
    pub kalman: KalmanParams,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_high_thresh: 0.5,
            track_low_thresh: 0.1,
            new_track_thresh: 0.6,
            track_buffer: 30,
            match_thresh: 0.8,
            fuse_score: true,
            proximity_thresh: 0.5,
            appearance_thresh: 0.25,
            with_reid: false,
            frame_rate: 30,
            kalman: KalmanParams::default(),
        }
    }
}

impl TrackerConfig {
    /// Check that all parameters are in range and mutually consistent
    pub fn validate(&self) -> Result<()> {
        let unit_ranged = [
            ("track_high_thresh", self.track_high_thresh),
            ("track_low_thresh", self.track_low_thresh),
            ("new_track_thresh", self.new_track_thresh),
            ("match_thresh", self.match_thresh),
            ("proximity_thresh", self.proximity_thresh),
            ("appearance_thresh", self.appearance_thresh),
        ];
        for (name, value) in unit_ranged {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrackError::Config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.track_low_thresh > self.track_high_thresh {
            return Err(TrackError::Config(format!(
                "track_low_thresh ({}) exceeds track_high_thresh ({})",
                self.track_low_thresh, self.track_high_thresh
            )));
        }
        if self.track_buffer == 0 {
            return Err(TrackError::Config("track_buffer must be positive".into()));
        }
        if self.frame_rate == 0 {
            return Err(TrackError::Config("frame_rate must be positive".into()));
        }
        if self.kalman.std_weight_position <= 0.0 || self.kalman.std_weight_velocity <= 0.0 {
            return Err(TrackError::Config(
                "kalman noise weights must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Number of frames a lost track is retained, scaled by frame rate
    pub fn max_time_lost(&self) -> u32 {
        (self.frame_rate as f64 / 30.0 * self.track_buffer as f64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_time_lost(), 30);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = TrackerConfig {
            track_high_thresh: 0.2,
            track_low_thresh: 0.6,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrackError::Config(_))));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = TrackerConfig {
            match_thresh: 1.5,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_frame_rate_rejected() {
        let config = TrackerConfig {
            frame_rate: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_time_lost_scales_with_frame_rate() {
        let config = TrackerConfig {
            frame_rate: 60,
            ..TrackerConfig::default()
        };
        assert_eq!(config.max_time_lost(), 60);
    }
}
