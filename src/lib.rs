//! Motion and appearance estimation core for multi-object tracking
//!
//! This crate provides the two leaf components a tracking pipeline composes:
//! - [`kalman`]: a constant-velocity Kalman filter over bounding-box state
//!   with single-track and batched operations
//! - [`matching`]: stateless cost-matrix construction (IoU, probabilistic
//!   IoU, embedding distance, confidence fusion)
//!
//! Track lifecycle management and the assignment solver that consumes the
//! cost matrices live in the caller; this core only predicts, projects and
//! scores. All state is caller-owned, so per-track operations are
//! data-parallel.
//!
//! ```rust
//! use boxtrack::{BoxKalmanFilter, Measurement, SizeRepr};
//!
//! let kf = BoxKalmanFilter::new(SizeRepr::AspectHeight);
//! let (mean, cov) = kf.initiate(&Measurement::new(100.0, 50.0, 1.5, 200.0))?;
//! let (mean, cov) = kf.predict(&mean, &cov);
//! let (mean, _cov) = kf.update(&mean, &cov, &Measurement::new(102.0, 50.0, 1.5, 200.0))?;
//! assert!(mean[0] > 100.0);
//! # Ok::<(), boxtrack::TrackError>(())
//! ```

pub mod bbox;
pub mod config;
pub mod error;
pub mod kalman;
pub mod matching;

pub use bbox::{batch_probiou, calculate_iou, ious, probiou, Bbox, RotatedBox};
pub use config::{KalmanParams, TrackerConfig};
pub use error::{Result, TrackError};
pub use kalman::{
    BoxKalmanFilter, GatingMetric, Measurement, SizeRepr, StateCov, StateMean, CHI2INV95,
};
pub use matching::{
    embedding_distance, fuse_score, iou_distance, BoxGeometry, Detection, EmbeddingMetric,
    TrackSnapshot,
};
