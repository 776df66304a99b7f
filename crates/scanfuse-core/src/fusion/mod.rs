//! Multi-algorithm detection fusion.
//!
//! Stages:
//! 1. **Cluster** – partition raw detections of one (view, class) bucket
//!    into correspondence groups by bounding-box IoU.
//! 2. **WBF** – reduce each group to one confidence-weighted consensus box.
//! 3. **Orchestration** – [`fuse_detections`] runs both across every
//!    (view, class) bucket present in the input and emits one fused
//!    detection per group.

pub mod cluster;
pub mod wbf;

pub use cluster::{cluster_detections, iou, CorrespondenceGroup, IOU_THRESHOLD};
pub use wbf::{fuse_group, FusedBox, FusionError};

use std::collections::BTreeMap;

use crate::{Detection, Mask, View, WBF_ALGORITHM};

/// Fuse raw per-algorithm detections into one consensus detection per
/// physical object.
///
/// Buckets the input by (view, class), clusters each bucket, and fuses each
/// correspondence group. The result entirely replaces any previous
/// summarized list — fusion is recomputed from scratch on every call, which
/// is fine for the tens-to-hundreds of detections a study carries.
///
/// Degenerate groups (zero confidence mass) are skipped with a warning
/// rather than producing NaN boxes. Fused confidence is clamped to 100
/// here, at the call site of [`fuse_group`].
pub fn fuse_detections(raw: &[Detection]) -> Vec<Detection> {
    let mut buckets: BTreeMap<(View, &str), Vec<&Detection>> = BTreeMap::new();
    for det in raw {
        buckets
            .entry((det.view, det.class_name.as_str()))
            .or_default()
            .push(det);
    }

    let mut fused = Vec::new();
    for ((view, class_name), dets) in buckets {
        let groups = cluster_detections(&dets);
        tracing::debug!(
            %view,
            class_name,
            detections = dets.len(),
            groups = groups.len(),
            "clustered bucket"
        );

        for group in groups {
            let members: Vec<&Detection> = group.members.iter().map(|&i| dets[i]).collect();
            match fuse_group(&members) {
                Ok(fb) => {
                    let rep = dets[group.representative];
                    fused.push(Detection {
                        view,
                        class_name: class_name.to_string(),
                        algorithm: WBF_ALGORITHM.to_string(),
                        bounding_box: fb.bounding_box.normalized(),
                        confidence: fb.confidence.min(100.0),
                        mask: Mask::None,
                        color: rep.color.clone(),
                        visible: true,
                        selected: false,
                        uuid: uuid::Uuid::new_v4().to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(%view, class_name, error = %e, "skipping correspondence group");
                }
            }
        }
    }
    fused
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;
    use approx::assert_relative_eq;

    fn det(view: View, class: &str, alg: &str, bb: [f64; 4], conf: f32) -> Detection {
        Detection::new(
            view,
            class,
            alg,
            BoundingBox::new(bb[0], bb[1], bb[2], bb[3]),
            conf,
            Mask::None,
        )
    }

    #[test]
    fn test_fuse_empty_input() {
        assert!(fuse_detections(&[]).is_empty());
    }

    #[test]
    fn test_fused_detection_shape() {
        let raw = vec![det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 80.0)];
        let fused = fuse_detections(&raw);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].algorithm, WBF_ALGORITHM);
        assert!(fused[0].mask.is_none());
        assert_eq!(fused[0].view, View::Top);
        assert_eq!(fused[0].class_name, "knife");
        assert!(fused[0].visible);
        assert!(!fused[0].selected);
        assert_ne!(fused[0].uuid, raw[0].uuid);
    }

    #[test]
    fn test_below_threshold_boxes_stay_separate() {
        // IoU(A, B) = 25 / 175 ≈ 0.143, below 0.55: each box fuses to
        // itself with confidence unchanged.
        let raw = vec![
            det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 80.0),
            det(View::Top, "knife", "alg2", [5.0, 5.0, 15.0, 15.0], 60.0),
        ];
        let fused = fuse_detections(&raw);
        assert_eq!(fused.len(), 2);

        let mut confs: Vec<f32> = fused.iter().map(|d| d.confidence).collect();
        confs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(confs, vec![60.0, 80.0]);

        let a = fused.iter().find(|d| d.confidence == 80.0).unwrap();
        assert_eq!(a.bounding_box, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_buckets_split_by_view_and_class() {
        // Identical boxes, but different view or class: never merged.
        let raw = vec![
            det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 50.0),
            det(View::Side, "knife", "alg2", [0.0, 0.0, 10.0, 10.0], 50.0),
            det(View::Top, "gun", "alg1", [0.0, 0.0, 10.0, 10.0], 50.0),
        ];
        assert_eq!(fuse_detections(&raw).len(), 3);
    }

    #[test]
    fn test_overlapping_detections_merge() {
        let raw = vec![
            det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 60.0),
            det(View::Top, "knife", "alg2", [1.0, 1.0, 10.0, 10.0], 40.0),
        ];
        let fused = fuse_detections(&raw);
        assert_eq!(fused.len(), 1);

        // Agreement across 2 distinct algorithms: sum * min(2,2)/2 = 100.
        assert_relative_eq!(fused[0].confidence, 100.0, epsilon = 1e-4);

        // Confidence-weighted corners: x1 = (60*0 + 40*1) / 100 = 0.4.
        assert_relative_eq!(fused[0].bounding_box.x1, 0.4, epsilon = 1e-9);
        assert_relative_eq!(fused[0].bounding_box.x2, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_confidence_clamped_to_100() {
        let raw = vec![
            det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 90.0),
            det(View::Top, "knife", "alg2", [0.0, 0.0, 10.0, 10.0], 85.0),
        ];
        let fused = fuse_detections(&raw);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].confidence, 100.0);
    }

    #[test]
    fn test_zero_confidence_group_is_skipped() {
        let raw = vec![det(View::Top, "knife", "alg1", [0.0, 0.0, 10.0, 10.0], 0.0)];
        assert!(fuse_detections(&raw).is_empty());
    }
}
