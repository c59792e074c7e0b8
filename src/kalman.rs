//! Constant-velocity Kalman filter specialized to bounding-box geometry
//!
//! The 8-dimensional state `[cx, cy, s1, s2, vcx, vcy, vs1, vs2]` holds the
//! box center, two size parameters and their velocities. Which two slots the
//! size parameters occupy is selected by [`SizeRepr`]; the algorithm is
//! otherwise identical between the two representations, so the PSD and
//! Cholesky invariants are enforced in exactly one place.
//!
//! The filter holds no per-track state: every call takes and returns
//! caller-owned `(mean, covariance)` values, which is what makes
//! [`BoxKalmanFilter::multi_predict`] embarrassingly parallel.

use crate::config::KalmanParams;
use crate::error::{Result, TrackError};
use nalgebra::{Cholesky, DMatrix, DVector, Matrix4, SMatrix, SVector, Vector4};
use rayon::prelude::*;
use std::str::FromStr;

/// Dimension of the full state vector
pub const STATE_DIM: usize = 8;
/// Dimension of the observed (measurement) subspace
pub const MEAS_DIM: usize = 4;

/// Gaussian belief mean over one track's state
pub type StateMean = SVector<f64, STATE_DIM>;
/// Gaussian belief covariance over one track's state
pub type StateCov = SMatrix<f64, STATE_DIM, STATE_DIM>;
/// A raw detection's geometry `[x, y, s1, s2]`
pub type Measurement = Vector4<f64>;

/// Chi-square 0.95 quantiles indexed by degrees of freedom (1..=9)
///
/// Gating thresholds for Mahalanobis distances: index 2 for
/// `only_position` gating, index 4 for full-box gating. Index 0 is unused.
pub const CHI2INV95: [f64; 10] = [
    0.0, 3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];

/// Which two state slots carry the box size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeRepr {
    /// `s1` = aspect ratio (w/h, dimensionless), `s2` = height
    AspectHeight,
    /// `s1` = width, `s2` = height
    WidthHeight,
}

/// Distance metric for [`BoxKalmanFilter::gating_distance`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatingMetric {
    /// Squared Euclidean distance in measurement space
    Gaussian,
    /// Squared Mahalanobis distance under the projected covariance
    Maha,
}

impl FromStr for GatingMetric {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gaussian" => Ok(GatingMetric::Gaussian),
            "maha" => Ok(GatingMetric::Maha),
            other => Err(TrackError::UnknownMetric {
                name: other.to_string(),
            }),
        }
    }
}

/// Constant-velocity Kalman filter over bounding-box state
///
/// Model matrices and noise weights are fixed at construction; the filter is
/// a pure function library over caller-owned `(mean, covariance)` pairs.
#[derive(Debug, Clone)]
pub struct BoxKalmanFilter {
    size_repr: SizeRepr,
    /// State transition matrix F (identity plus unit-dt velocity coupling)
    motion_mat: SMatrix<f64, STATE_DIM, STATE_DIM>,
    /// Observation matrix H (drops the four velocity components)
    update_mat: SMatrix<f64, MEAS_DIM, STATE_DIM>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl BoxKalmanFilter {
    /// Create a filter with the default noise weights (1/20 and 1/160)
    pub fn new(size_repr: SizeRepr) -> Self {
        Self::from_params(size_repr, &KalmanParams::default())
    }

    /// Create a filter with configured noise weights
    pub fn from_params(size_repr: SizeRepr, params: &KalmanParams) -> Self {
        let dt = 1.0;
        let mut motion_mat = SMatrix::<f64, STATE_DIM, STATE_DIM>::identity();
        for i in 0..MEAS_DIM {
            motion_mat[(i, MEAS_DIM + i)] = dt;
        }
        let mut update_mat = SMatrix::<f64, MEAS_DIM, STATE_DIM>::zeros();
        for i in 0..MEAS_DIM {
            update_mat[(i, i)] = 1.0;
        }

        Self {
            size_repr,
            motion_mat,
            update_mat,
            std_weight_position: params.std_weight_position,
            std_weight_velocity: params.std_weight_velocity,
        }
    }

    pub fn size_repr(&self) -> SizeRepr {
        self.size_repr
    }

    /// Per-component process noise stds for the current state
    fn process_noise_std(&self, mean: &StateMean) -> ([f64; 4], [f64; 4]) {
        let kp = self.std_weight_position;
        let kv = self.std_weight_velocity;
        match self.size_repr {
            SizeRepr::AspectHeight => {
                let h = mean[3];
                (
                    [kp * h, kp * h, 1e-2, kp * h],
                    [kv * h, kv * h, 1e-5, kv * h],
                )
            }
            SizeRepr::WidthHeight => {
                let w = mean[2];
                let h = mean[3];
                (
                    [kp * w, kp * h, kp * w, kp * h],
                    [kv * w, kv * h, kv * w, kv * h],
                )
            }
        }
    }

    /// Observation noise stds; coarser than the process noise, so the
    /// filter trusts its own dynamics somewhat more than raw detections.
    fn innovation_std(&self, mean: &StateMean) -> [f64; 4] {
        let kp = self.std_weight_position;
        match self.size_repr {
            SizeRepr::AspectHeight => {
                let h = mean[3];
                [kp * h, kp * h, 1e-1, kp * h]
            }
            SizeRepr::WidthHeight => {
                let w = mean[2];
                let h = mean[3];
                [kp * w, kp * h, kp * w, kp * h]
            }
        }
    }

    /// Create a track belief from an unassociated measurement
    ///
    /// Velocities start at zero mean; the diagonal covariance scales with
    /// the measured box size. Aspect-ratio uncertainty (variant
    /// [`SizeRepr::AspectHeight`]) uses small fixed constants since aspect
    /// ratio is dimensionless.
    ///
    /// # Errors
    /// `NonFiniteMeasurement` for NaN/inf components, `NonPositiveSize` for
    /// degenerate size terms; a silent singular covariance is never produced.
    pub fn initiate(&self, measurement: &Measurement) -> Result<(StateMean, StateCov)> {
        for (index, &value) in measurement.iter().enumerate() {
            if !value.is_finite() {
                return Err(TrackError::NonFiniteMeasurement { index, value });
            }
        }
        for index in [2, 3] {
            let value = measurement[index];
            if value <= 0.0 {
                return Err(TrackError::NonPositiveSize { index, value });
            }
        }

        let mut mean = StateMean::zeros();
        for i in 0..MEAS_DIM {
            mean[i] = measurement[i];
        }

        let kp = self.std_weight_position;
        let kv = self.std_weight_velocity;
        let std = match self.size_repr {
            SizeRepr::AspectHeight => {
                let h = measurement[3];
                [
                    2.0 * kp * h,
                    2.0 * kp * h,
                    1e-2,
                    2.0 * kp * h,
                    10.0 * kv * h,
                    10.0 * kv * h,
                    1e-5,
                    10.0 * kv * h,
                ]
            }
            SizeRepr::WidthHeight => {
                let w = measurement[2];
                let h = measurement[3];
                [
                    2.0 * kp * w,
                    2.0 * kp * h,
                    2.0 * kp * w,
                    2.0 * kp * h,
                    10.0 * kv * w,
                    10.0 * kv * h,
                    10.0 * kv * w,
                    10.0 * kv * h,
                ]
            }
        };
        let mut covariance = StateCov::zeros();
        for i in 0..STATE_DIM {
            covariance[(i, i)] = std[i] * std[i];
        }
        Ok((mean, covariance))
    }

    /// Propagate a belief one time step under the constant-velocity model
    pub fn predict(&self, mean: &StateMean, covariance: &StateCov) -> (StateMean, StateCov) {
        let (std_pos, std_vel) = self.process_noise_std(mean);
        let mut motion_cov = StateCov::zeros();
        for i in 0..MEAS_DIM {
            motion_cov[(i, i)] = std_pos[i] * std_pos[i];
            motion_cov[(MEAS_DIM + i, MEAS_DIM + i)] = std_vel[i] * std_vel[i];
        }

        let mean = self.motion_mat * mean;
        let covariance = self.motion_mat * covariance * self.motion_mat.transpose() + motion_cov;
        (mean, covariance)
    }

    /// Project a belief into 4-d measurement space
    ///
    /// Velocity components are dropped, never mutated.
    pub fn project(&self, mean: &StateMean, covariance: &StateCov) -> (Measurement, Matrix4<f64>) {
        let std = self.innovation_std(mean);
        let mut innovation_cov = Matrix4::zeros();
        for i in 0..MEAS_DIM {
            innovation_cov[(i, i)] = std[i] * std[i];
        }

        let projected_mean = self.update_mat * mean;
        let projected_cov =
            self.update_mat * covariance * self.update_mat.transpose() + innovation_cov;
        (projected_mean, projected_cov)
    }

    /// Batched [`predict`](Self::predict) over N independent tracks
    ///
    /// Tracks share no state, so the batch is data-parallel; results are
    /// element-wise identical to N single `predict` calls.
    ///
    /// # Errors
    /// `DimensionMismatch` when the two slices disagree in length.
    pub fn multi_predict(
        &self,
        means: &[StateMean],
        covariances: &[StateCov],
    ) -> Result<(Vec<StateMean>, Vec<StateCov>)> {
        if means.len() != covariances.len() {
            return Err(TrackError::DimensionMismatch {
                context: "multi_predict covariance batch",
                expected: means.len(),
                actual: covariances.len(),
            });
        }
        Ok(means
            .par_iter()
            .zip(covariances.par_iter())
            .map(|(mean, covariance)| self.predict(mean, covariance))
            .unzip())
    }

    /// Bayesian correction of a predicted belief with a matched measurement
    ///
    /// The Kalman gain is obtained by solving against the Cholesky factor of
    /// the projected covariance; that matrix can be ill-conditioned for
    /// small boxes and an explicit inverse would corrupt results silently.
    ///
    /// # Errors
    /// `NotPositiveDefinite` when the projected covariance fails to factor,
    /// which indicates upstream state corruption rather than a local issue.
    pub fn update(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
        measurement: &Measurement,
    ) -> Result<(StateMean, StateCov)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let chol = Cholesky::new(projected_cov).ok_or(TrackError::NotPositiveDefinite {
            context: "projected covariance",
        })?;
        // K = P Hᵀ S⁻¹, computed as solve(S, H P)ᵀ since P and S are symmetric
        let kalman_gain = chol.solve(&(self.update_mat * covariance)).transpose();
        let innovation = measurement - projected_mean;

        let new_mean = mean + kalman_gain * innovation;
        let new_covariance = covariance - kalman_gain * projected_cov * kalman_gain.transpose();
        Ok((new_mean, new_covariance))
    }

    /// Squared distance from the projected belief to each measurement
    ///
    /// With `only_position` the belief and measurements are restricted to
    /// the two center coordinates before distancing, for when size and
    /// appearance are unreliable gating signals. Suitable thresholds for
    /// the Mahalanobis metric come from [`CHI2INV95`].
    ///
    /// # Errors
    /// `NotPositiveDefinite` when the projected covariance cannot be
    /// factored for the Mahalanobis metric.
    pub fn gating_distance(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
        measurements: &[Measurement],
        only_position: bool,
        metric: GatingMetric,
    ) -> Result<Vec<f64>> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let dim = if only_position { 2 } else { MEAS_DIM };

        let mean_d = DVector::from_iterator(dim, projected_mean.iter().take(dim).copied());
        let diffs: Vec<DVector<f64>> = measurements
            .iter()
            .map(|m| DVector::from_iterator(dim, m.iter().take(dim).copied()) - &mean_d)
            .collect();

        match metric {
            GatingMetric::Gaussian => Ok(diffs.iter().map(|d| d.norm_squared()).collect()),
            GatingMetric::Maha => {
                let cov_d = DMatrix::from_fn(dim, dim, |i, j| projected_cov[(i, j)]);
                let chol = Cholesky::new(cov_d).ok_or(TrackError::NotPositiveDefinite {
                    context: "projected covariance",
                })?;
                let factor = chol.l();
                diffs
                    .iter()
                    .map(|d| {
                        factor
                            .solve_lower_triangular(d)
                            .map(|z| z.norm_squared())
                            .ok_or(TrackError::NotPositiveDefinite {
                                context: "projected covariance Cholesky factor",
                            })
                    })
                    .collect()
            }
        }
    }
}
