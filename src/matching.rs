//! Association cost engine: stateless functions turning track and detection
//! descriptors into non-negative cost matrices
//!
//! Every function is total over well-formed input and returns an empty
//! matrix (never an error) when either side is empty: frames with no
//! tracks or no detections are the common case, not a failure. Row `i` /
//! column `j` indexing is consistent across all matrices produced for the
//! same frame, so the external assignment solver can combine them freely.

use crate::bbox::{batch_probiou, ious, RotatedBox};
use crate::error::{Result, TrackError};
use ndarray::prelude::*;
use rayon::prelude::*;
use std::str::FromStr;

/// Distance metric for [`embedding_distance`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmbeddingMetric {
    /// Cosine distance (1 − cosine similarity); assumes meaningful norms
    #[default]
    Cosine,
    /// Euclidean (L2) distance
    Euclidean,
}

impl FromStr for EmbeddingMetric {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(EmbeddingMetric::Cosine),
            "euclidean" => Ok(EmbeddingMetric::Euclidean),
            other => Err(TrackError::UnknownMetric {
                name: other.to_string(),
            }),
        }
    }
}

/// One frame's raw observation of an object, not yet associated to a track
#[derive(Debug, Clone)]
pub struct Detection {
    /// Axis-aligned corners [xmin, ymin, xmax, ymax]
    pub xyxy: [f32; 4],
    /// Rotated form, when the detector produces oriented boxes
    pub rotated: Option<RotatedBox>,
    /// Detector confidence in [0, 1]
    pub score: f32,
    /// Appearance embedding from the current frame
    pub embedding: Option<Array1<f32>>,
}

impl Detection {
    pub fn new(xyxy: [f32; 4], score: f32) -> Self {
        Self {
            xyxy,
            rotated: None,
            score,
            embedding: None,
        }
    }

    pub fn with_rotated(mut self, rotated: RotatedBox) -> Self {
        self.rotated = Some(rotated);
        self
    }

    pub fn with_embedding(mut self, embedding: Array1<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// The geometric/appearance slice of a track the cost engine needs
///
/// Extracted by the lifecycle manager from its own track objects; this core
/// never owns tracks.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    /// Predicted axis-aligned corners [xmin, ymin, xmax, ymax]
    pub xyxy: [f32; 4],
    /// Predicted rotated form, when the track carries one
    pub rotated: Option<RotatedBox>,
    /// Temporally smoothed appearance embedding
    pub smooth_embedding: Option<Array1<f32>>,
}

impl TrackSnapshot {
    pub fn new(xyxy: [f32; 4]) -> Self {
        Self {
            xyxy,
            rotated: None,
            smooth_embedding: None,
        }
    }

    pub fn with_rotated(mut self, rotated: RotatedBox) -> Self {
        self.rotated = Some(rotated);
        self
    }

    pub fn with_embedding(mut self, embedding: Array1<f32>) -> Self {
        self.smooth_embedding = Some(embedding);
        self
    }
}

/// Geometry seam of [`iou_distance`]: anything that exposes axis-aligned
/// corners and, optionally, a rotated form
pub trait BoxGeometry {
    fn xyxy(&self) -> [f32; 4];

    fn rotated(&self) -> Option<RotatedBox> {
        None
    }
}

impl BoxGeometry for Detection {
    fn xyxy(&self) -> [f32; 4] {
        self.xyxy
    }

    fn rotated(&self) -> Option<RotatedBox> {
        self.rotated
    }
}

impl BoxGeometry for TrackSnapshot {
    fn xyxy(&self) -> [f32; 4] {
        self.xyxy
    }

    fn rotated(&self) -> Option<RotatedBox> {
        self.rotated
    }
}

impl BoxGeometry for [f32; 4] {
    fn xyxy(&self) -> [f32; 4] {
        *self
    }
}

impl BoxGeometry for RotatedBox {
    fn xyxy(&self) -> [f32; 4] {
        self.aabb().to_xyxy()
    }

    fn rotated(&self) -> Option<RotatedBox> {
        Some(*self)
    }
}

/// Appearance cost matrix between track and detection embeddings
///
/// Entry `[i, j]` is the distance between track `i`'s smoothed embedding and
/// detection `j`'s current embedding, clamped at 0 so numerical noise never
/// produces a negative cost. An empty side yields an empty matrix.
///
/// # Errors
/// `MissingEmbedding` when a descriptor has no embedding,
/// `DimensionMismatch` when embedding lengths disagree.
pub fn embedding_distance(
    tracks: &[TrackSnapshot],
    detections: &[Detection],
    metric: EmbeddingMetric,
) -> Result<Array2<f32>> {
    let n = tracks.len();
    let m = detections.len();
    if n == 0 || m == 0 {
        return Ok(Array2::zeros((n, m)));
    }

    let mut track_feats = Vec::with_capacity(n);
    for (index, track) in tracks.iter().enumerate() {
        track_feats.push(track.smooth_embedding.as_ref().ok_or(
            TrackError::MissingEmbedding {
                side: "track",
                index,
            },
        )?);
    }
    let mut det_feats = Vec::with_capacity(m);
    for (index, det) in detections.iter().enumerate() {
        det_feats.push(det.embedding.as_ref().ok_or(TrackError::MissingEmbedding {
            side: "detection",
            index,
        })?);
    }

    let dim = track_feats[0].len();
    for feat in track_feats.iter().chain(det_feats.iter()) {
        if feat.len() != dim {
            return Err(TrackError::DimensionMismatch {
                context: "embedding length",
                expected: dim,
                actual: feat.len(),
            });
        }
    }

    let cost_data: Vec<f32> = track_feats
        .par_iter()
        .flat_map(|a| {
            det_feats
                .iter()
                .map(|b| pairwise_distance(a, b, metric).max(0.0))
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(Array2::from_shape_vec((n, m), cost_data).expect("embedding cost shape"))
}

fn pairwise_distance(a: &Array1<f32>, b: &Array1<f32>, metric: EmbeddingMetric) -> f32 {
    match metric {
        EmbeddingMetric::Cosine => {
            let denom = a.dot(a).sqrt() * b.dot(b).sqrt();
            if denom <= f32::EPSILON {
                // a zero-norm embedding carries no direction; maximal cost
                return 1.0;
            }
            1.0 - a.dot(b) / denom
        }
        EmbeddingMetric::Euclidean => {
            let mut sum = 0.0;
            for (x, y) in a.iter().zip(b.iter()) {
                let d = x - y;
                sum += d * d;
            }
            sum.sqrt()
        }
    }
}

/// Geometric cost matrix: `1 − IoU` between two box lists
///
/// Rotated boxes are scored with probabilistic IoU, but only when **every**
/// box on **both** sides carries a rotated form; any missing rotated form
/// drops the whole call to exact axis-aligned IoU over the corner boxes, so
/// a single matrix is never a mix of two metrics. An empty side yields an
/// empty matrix; the zeros there signal "no pairs to score", nothing more.
pub fn iou_distance<A: BoxGeometry, B: BoxGeometry>(atracks: &[A], btracks: &[B]) -> Array2<f32> {
    let all_rotated = !atracks.is_empty()
        && !btracks.is_empty()
        && atracks.iter().all(|t| t.rotated().is_some())
        && btracks.iter().all(|t| t.rotated().is_some());

    let overlap = if all_rotated {
        let aboxes: Vec<RotatedBox> = atracks.iter().filter_map(|t| t.rotated()).collect();
        let bboxes: Vec<RotatedBox> = btracks.iter().filter_map(|t| t.rotated()).collect();
        batch_probiou(&aboxes, &bboxes)
    } else {
        let aboxes: Vec<[f32; 4]> = atracks.iter().map(|t| t.xyxy()).collect();
        let bboxes: Vec<[f32; 4]> = btracks.iter().map(|t| t.xyxy()).collect();
        ious(&aboxes, &bboxes)
    };

    overlap.mapv(|iou| 1.0 - iou)
}

/// Re-weight a geometric cost matrix by detection confidence
///
/// `fused[i, j] = 1 − (1 − cost[i, j]) · score_j`: a geometrically plausible
/// match to a low-confidence detection costs more than the same match to a
/// high-confidence one. Returns the matrix unchanged when it is empty.
///
/// # Errors
/// `DimensionMismatch` when the column count differs from the number of
/// detections.
pub fn fuse_score(cost_matrix: &Array2<f32>, detections: &[Detection]) -> Result<Array2<f32>> {
    if cost_matrix.is_empty() {
        return Ok(cost_matrix.clone());
    }
    if cost_matrix.ncols() != detections.len() {
        return Err(TrackError::DimensionMismatch {
            context: "fuse_score detection count",
            expected: cost_matrix.ncols(),
            actual: detections.len(),
        });
    }

    Ok(Array2::from_shape_fn(cost_matrix.dim(), |(i, j)| {
        1.0 - (1.0 - cost_matrix[[i, j]]) * detections[j].score
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn embedded_pair() -> (Vec<TrackSnapshot>, Vec<Detection>) {
        let feats = [
            array![1.0_f32, 0.0, 0.0],
            array![0.0_f32, 1.0, 0.0],
        ];
        let tracks = feats
            .iter()
            .map(|f| TrackSnapshot::new([0.0, 0.0, 1.0, 1.0]).with_embedding(f.clone()))
            .collect();
        let dets = feats
            .iter()
            .map(|f| Detection::new([0.0, 0.0, 1.0, 1.0], 0.9).with_embedding(f.clone()))
            .collect();
        (tracks, dets)
    }

    #[test]
    fn test_embedding_distance_cosine_diagonal_zero() {
        let (tracks, dets) = embedded_pair();
        let cost = embedding_distance(&tracks, &dets, EmbeddingMetric::Cosine).unwrap();
        assert_eq!(cost.dim(), (2, 2));
        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(cost[[1, 1]], 0.0, epsilon = 1e-6);
        // orthogonal embeddings: cosine distance 1
        assert_abs_diff_eq!(cost[[0, 1]], 1.0, epsilon = 1e-6);
        for v in cost.iter() {
            assert!(*v >= 0.0);
        }
    }

    #[test]
    fn test_embedding_distance_euclidean() {
        let (tracks, dets) = embedded_pair();
        let cost = embedding_distance(&tracks, &dets, EmbeddingMetric::Euclidean).unwrap();
        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(cost[[0, 1]], 2.0_f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_embedding_distance_empty_inputs() {
        let (tracks, dets) = embedded_pair();
        assert_eq!(
            embedding_distance(&[], &dets, EmbeddingMetric::Cosine)
                .unwrap()
                .dim(),
            (0, 2)
        );
        assert_eq!(
            embedding_distance(&tracks, &[], EmbeddingMetric::Cosine)
                .unwrap()
                .dim(),
            (2, 0)
        );
    }

    #[test]
    fn test_embedding_distance_missing_embedding() {
        let (tracks, mut dets) = embedded_pair();
        dets[1].embedding = None;
        let err = embedding_distance(&tracks, &dets, EmbeddingMetric::Cosine).unwrap_err();
        assert_eq!(
            err,
            TrackError::MissingEmbedding {
                side: "detection",
                index: 1
            }
        );
    }

    #[test]
    fn test_embedding_distance_length_mismatch() {
        let (tracks, mut dets) = embedded_pair();
        dets[0].embedding = Some(array![1.0_f32, 0.0]);
        let err = embedding_distance(&tracks, &dets, EmbeddingMetric::Cosine).unwrap_err();
        assert!(matches!(err, TrackError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_embedding_metric_parsing() {
        assert_eq!(
            "cosine".parse::<EmbeddingMetric>().unwrap(),
            EmbeddingMetric::Cosine
        );
        assert!(matches!(
            "hamming".parse::<EmbeddingMetric>(),
            Err(TrackError::UnknownMetric { .. })
        ));
    }

    #[test]
    fn test_iou_distance_identical_and_disjoint() {
        let a = [[0.0_f32, 0.0, 10.0, 10.0]];
        let b = [[0.0_f32, 0.0, 10.0, 10.0], [50.0, 50.0, 60.0, 60.0]];
        let cost = iou_distance(&a, &b);
        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(cost[[0, 1]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_iou_distance_empty() {
        let a: [[f32; 4]; 0] = [];
        let b = [[0.0_f32, 0.0, 10.0, 10.0]];
        assert_eq!(iou_distance(&a, &b).dim(), (0, 1));
        assert_eq!(iou_distance(&b, &a).dim(), (1, 0));
    }

    #[test]
    fn test_iou_distance_rotated_pairs() {
        let a = [RotatedBox::new(10.0, 10.0, 8.0, 4.0, 0.5)];
        let b = [RotatedBox::new(10.0, 10.0, 8.0, 4.0, 0.5)];
        let cost = iou_distance(&a, &b);
        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_iou_distance_mixed_falls_back_to_axis_aligned() {
        // Track carries a rotated form, detection does not: both are scored
        // on their axis-aligned corners.
        let rotated = RotatedBox::new(5.0, 5.0, 10.0, 10.0, 0.0);
        let tracks = [TrackSnapshot::new(rotated.aabb().to_xyxy()).with_rotated(rotated)];
        let dets = [Detection::new([0.0, 0.0, 10.0, 10.0], 0.9)];
        let cost = iou_distance(&tracks, &dets);
        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fuse_score_known_value() {
        let cost = array![[0.2_f32]];
        let dets = vec![Detection::new([0.0, 0.0, 1.0, 1.0], 0.5)];
        let fused = fuse_score(&cost, &dets).unwrap();
        // 1 - (1 - 0.2) * 0.5 = 0.6
        assert_abs_diff_eq!(fused[[0, 0]], 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_fuse_score_empty_is_noop() {
        let cost = Array2::<f32>::zeros((0, 0));
        let fused = fuse_score(&cost, &[]).unwrap();
        assert_eq!(fused.dim(), (0, 0));
    }

    #[test]
    fn test_fuse_score_dimension_mismatch() {
        let cost = array![[0.2_f32, 0.3]];
        let dets = vec![Detection::new([0.0, 0.0, 1.0, 1.0], 0.5)];
        assert!(matches!(
            fuse_score(&cost, &dets),
            Err(TrackError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cost_matrices_share_indexing() {
        // The geometric and fused matrices for one frame must agree on
        // row/column meaning.
        let tracks = [
            TrackSnapshot::new([0.0, 0.0, 10.0, 10.0]),
            TrackSnapshot::new([20.0, 20.0, 30.0, 30.0]),
        ];
        let dets = vec![
            Detection::new([0.0, 0.0, 10.0, 10.0], 1.0),
            Detection::new([20.0, 20.0, 30.0, 30.0], 0.5),
        ];
        let cost = iou_distance(&tracks, &dets);
        let fused = fuse_score(&cost, &dets).unwrap();
        assert_eq!(cost.dim(), fused.dim());
        // perfect geometric match with score 1.0 stays at zero cost
        assert_abs_diff_eq!(fused[[0, 0]], 0.0, epsilon = 1e-6);
        // perfect geometric match with score 0.5 costs 0.5 after fusion
        assert_abs_diff_eq!(fused[[1, 1]], 0.5, epsilon = 1e-6);
    }
}
