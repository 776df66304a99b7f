//! Weighted box fusion: reduce one correspondence group to a single
//! consensus box and confidence.

use std::collections::HashSet;

use crate::{BoundingBox, Detection};

/// Errors from fusing a correspondence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionError {
    /// The group has no members.
    EmptyGroup,
    /// Total confidence mass is zero; the weighted average is undefined.
    ZeroConfidenceSum,
}

impl std::fmt::Display for FusionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyGroup => write!(f, "empty correspondence group"),
            Self::ZeroConfidenceSum => write!(f, "zero confidence sum in correspondence group"),
        }
    }
}

impl std::error::Error for FusionError {}

/// Fused box and pre-clamp confidence for one correspondence group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedBox {
    pub bounding_box: BoundingBox,
    /// Non-negative; the caller clamps to 100.
    pub confidence: f32,
}

/// Confidence-weighted fusion of one correspondence group.
///
/// Each corner of the fused box is the confidence-weighted mean of the
/// members' corresponding corners. Averaging corners independently is not
/// a true weighted-average box — it can shrink the result relative to any
/// member — but it is the established behavior consumers calibrate
/// against, so it is kept as-is.
///
/// Fused confidence is `confidence_sum * min(n_boxes, n_algorithms) /
/// n_algorithms`: total evidence scaled by distinct-algorithm agreement.
/// Repeated detections from one algorithm raise the sum but never the
/// agreement factor, so a single noisy algorithm cannot inflate the result
/// beyond its raw confidence mass.
pub fn fuse_group(members: &[&Detection]) -> Result<FusedBox, FusionError> {
    if members.is_empty() {
        return Err(FusionError::EmptyGroup);
    }

    let mut seen_algorithms: HashSet<&str> = HashSet::new();
    let mut confidence_sum = 0.0f64;
    let (mut x1, mut y1, mut x2, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);

    for det in members {
        seen_algorithms.insert(det.algorithm.as_str());
        let c = det.confidence as f64;
        confidence_sum += c;
        x1 += c * det.bounding_box.x1;
        y1 += c * det.bounding_box.y1;
        x2 += c * det.bounding_box.x2;
        y2 += c * det.bounding_box.y2;
    }

    let n_algorithms = seen_algorithms.len();
    if confidence_sum <= 0.0 || n_algorithms == 0 {
        return Err(FusionError::ZeroConfidenceSum);
    }

    let bounding_box = BoundingBox::new(
        x1 / confidence_sum,
        y1 / confidence_sum,
        x2 / confidence_sum,
        y2 / confidence_sum,
    );

    let agreement = members.len().min(n_algorithms) as f64 / n_algorithms as f64;
    let confidence = (confidence_sum * agreement) as f32;

    Ok(FusedBox {
        bounding_box,
        confidence,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
