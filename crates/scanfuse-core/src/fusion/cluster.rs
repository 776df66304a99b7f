//! IoU clustering: partition raw detections of one (view, class) bucket
//! into correspondence groups — sets of detections believed to refer to the
//! same physical object.

use crate::{BoundingBox, Detection};

/// Minimum IoU for two boxes to be considered the same object.
pub const IOU_THRESHOLD: f64 = 0.55;

/// Intersection-over-Union of two diagonal-corner boxes.
///
/// Overlap extents are clamped at zero, so disjoint and degenerate
/// (zero-area) boxes yield 0 rather than negative intersection. A
/// non-positive union (both boxes degenerate points) also yields 0 — the
/// quotient must never go NaN, since it feeds fusion weights downstream.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let x_overlap = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let y_overlap = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = x_overlap * y_overlap;

    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// A transient group of detections referring to the same physical object.
///
/// Indices refer into the slice passed to [`cluster_detections`]. The
/// representative (the group's first member) anchors the group's spatial
/// comparisons and supplies metadata for the fused output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceGroup {
    pub members: Vec<usize>,
    pub representative: usize,
}

/// Greedy single-pass grouping by IoU against each group's representative.
///
/// Input is expected to be pre-filtered to one (view, class) bucket; this
/// function looks at geometry only. Each detection joins the first existing
/// group whose representative it overlaps at [`IOU_THRESHOLD`] or above,
/// otherwise it seeds a new group.
pub fn cluster_detections(dets: &[&Detection]) -> Vec<CorrespondenceGroup> {
    let mut groups: Vec<CorrespondenceGroup> = Vec::new();
    for (i, det) in dets.iter().enumerate() {
        let home = groups.iter_mut().find(|g| {
            iou(&dets[g.representative].bounding_box, &det.bounding_box) >= IOU_THRESHOLD
        });
        match home {
            Some(g) => g.members.push(i),
            None => groups.push(CorrespondenceGroup {
                members: vec![i],
                representative: i,
            }),
        }
    }
    groups
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Detection, Mask, View};
    use approx::assert_relative_eq;

    fn bb(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    fn det(alg: &str, b: BoundingBox) -> Detection {
        Detection::new(View::Top, "knife", alg, b, 50.0, Mask::None)
    }

    #[test]
    fn test_iou_identity() {
        let a = bb(0.0, 0.0, 10.0, 10.0);
        assert_relative_eq!(iou(&a, &a), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_iou_symmetry() {
        let a = bb(0.0, 0.0, 10.0, 10.0);
        let b = bb(3.0, 4.0, 12.0, 15.0);
        assert_relative_eq!(iou(&a, &b), iou(&b, &a), epsilon = 1e-12);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bb(0.0, 0.0, 10.0, 10.0);
        let b = bb(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // inter = 5x5 = 25, union = 100 + 100 - 25 = 175.
        let a = bb(0.0, 0.0, 10.0, 10.0);
        let b = bb(5.0, 5.0, 15.0, 15.0);
        assert_relative_eq!(iou(&a, &b), 25.0 / 175.0, epsilon = 1e-12);
    }

    #[test]
    fn test_iou_degenerate_boxes_no_nan() {
        let point = bb(5.0, 5.0, 5.0, 5.0);
        let a = bb(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&point, &a), 0.0);
        // Both degenerate: denominator would be zero, must still be 0.
        let v = iou(&point, &point);
        assert_eq!(v, 0.0);
        assert!(!v.is_nan());
    }

    #[test]
    fn test_cluster_empty() {
        assert!(cluster_detections(&[]).is_empty());
    }

    #[test]
    fn test_cluster_merges_overlapping() {
        let d1 = det("alg1", bb(0.0, 0.0, 10.0, 10.0));
        let d2 = det("alg2", bb(1.0, 1.0, 10.0, 10.0));
        let d3 = det("alg3", bb(0.0, 0.0, 10.0, 11.0));
        let dets: Vec<&Detection> = vec![&d1, &d2, &d3];
        let groups = cluster_detections(&dets);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![0, 1, 2]);
        assert_eq!(groups[0].representative, 0);
    }

    #[test]
    fn test_cluster_splits_below_threshold() {
        let d1 = det("alg1", bb(0.0, 0.0, 10.0, 10.0));
        let d2 = det("alg2", bb(5.0, 5.0, 15.0, 15.0)); // IoU ≈ 0.143
        let dets: Vec<&Detection> = vec![&d1, &d2];
        let groups = cluster_detections(&dets);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![0]);
        assert_eq!(groups[1].members, vec![1]);
    }

    #[test]
    fn test_cluster_joins_first_matching_group() {
        let d1 = det("alg1", bb(0.0, 0.0, 10.0, 10.0));
        let d2 = det("alg1", bb(100.0, 100.0, 110.0, 110.0));
        let d3 = det("alg2", bb(0.0, 0.0, 10.0, 10.0)); // matches group of d1
        let dets: Vec<&Detection> = vec![&d1, &d2, &d3];
        let groups = cluster_detections(&dets);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![0, 2]);
        assert_eq!(groups[1].members, vec![1]);
    }
}
