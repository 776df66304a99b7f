//! MS-COCO JSON annotation codec.
//!
//! COCO stores boxes as `[x, y, width, height]`; the internal
//! representation is diagonal corners, so ingestion converts (purely —
//! caller data is never mutated) and serialization converts back.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::codec::{decimal_to_percentage, ParseError};
use crate::geometry;
use crate::{BoundingBox, Detection, Mask, MaskVertex, View};

/// COCO dataset mirror: only the fields the annotation tool reads/writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDataset {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// `[x, y, width, height]`.
    pub bbox: Vec<f64>,
    /// Zero or more flat `[x1, y1, x2, y2, ...]` polygons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segmentation: Vec<Vec<f64>>,
    /// Prediction confidence in `[0, 1]`; absent for ground truth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iscrowd: Option<u8>,
}

/// Convert a COCO `[x, y, w, h]` bbox to diagonal corners.
///
/// Pure: returns a new box, never mutates the annotation.
fn bbox_to_corners(bbox: &[f64]) -> Result<BoundingBox, ParseError> {
    match bbox {
        &[x, y, w, h] => Ok(BoundingBox::new(x, y, x + w, y + h).normalized()),
        other => Err(ParseError::Malformed(format!(
            "bbox must have 4 values, got {}",
            other.len()
        ))),
    }
}

/// Parse one algorithm's COCO annotation payload into detections.
///
/// `view` and `algorithm` come from the study container entry the payload
/// was read from (one COCO file per algorithm per view). A missing `score`
/// means ground truth and maps to full confidence. The first segmentation
/// polygon, when present, becomes the detection's polygon mask with anchors
/// computed against the just-converted bounding box.
pub fn parse_coco_detections(
    json: &str,
    view: View,
    algorithm: &str,
) -> Result<Vec<Detection>, ParseError> {
    let dataset: CocoDataset = serde_json::from_str(json)?;

    let categories: HashMap<u64, String> = dataset
        .categories
        .iter()
        .map(|c| (c.id, c.name.to_lowercase()))
        .collect();

    let mut detections = Vec::with_capacity(dataset.annotations.len());
    for ann in &dataset.annotations {
        let class_name = categories
            .get(&ann.category_id)
            .ok_or(ParseError::MissingField("category_id"))?;

        let bounding_box = bbox_to_corners(&ann.bbox)?;
        let confidence = decimal_to_percentage(ann.score.unwrap_or(1.0)).clamp(0.0, 100.0);
        let mask = polygon_mask_from_segmentation(&ann.segmentation, &bounding_box);

        detections.push(Detection::new(
            view,
            class_name.clone(),
            algorithm,
            bounding_box,
            confidence,
            mask,
        ));
    }

    tracing::debug!(
        %view,
        algorithm,
        count = detections.len(),
        "parsed COCO detections"
    );
    Ok(detections)
}

fn polygon_mask_from_segmentation(segmentation: &[Vec<f64>], bbox: &BoundingBox) -> Mask {
    let Some(flat) = segmentation.first() else {
        return Mask::None;
    };
    // A valid ring needs at least 3 (x, y) pairs; odd tails are dropped.
    if flat.len() < 6 {
        return Mask::None;
    }
    let verts: Vec<MaskVertex> = flat
        .chunks_exact(2)
        .map(|xy| MaskVertex::at(xy[0], xy[1]))
        .collect();
    Mask::Polygon(geometry::mask_anchor_points(bbox, &verts))
}

/// Serialize detections back to a COCO annotation payload.
///
/// Categories are rebuilt from the distinct class names present, ids
/// assigned in first-encounter order. Polygon masks become single-ring
/// segmentations; raster masks are not representable in COCO and are
/// dropped with a warning.
pub fn serialize_coco_detections(detections: &[Detection]) -> Result<String, ParseError> {
    let mut category_ids: BTreeMap<&str, u64> = BTreeMap::new();
    for det in detections {
        let next = category_ids.len() as u64 + 1;
        category_ids.entry(det.class_name.as_str()).or_insert(next);
    }

    let categories = category_ids
        .iter()
        .map(|(&name, &id)| CocoCategory {
            id,
            name: name.to_string(),
            supercategory: None,
        })
        .collect();

    let annotations = detections
        .iter()
        .enumerate()
        .map(|(i, det)| {
            let rect = det.bounding_box.to_rect();
            let segmentation = match &det.mask {
                Mask::Polygon(verts) => {
                    vec![verts.iter().flat_map(|v| [v.x, v.y]).collect()]
                }
                Mask::Raster(_) => {
                    tracing::warn!(uuid = %det.uuid, "raster mask dropped in COCO export");
                    Vec::new()
                }
                Mask::None => Vec::new(),
            };
            CocoAnnotation {
                id: i as u64 + 1,
                image_id: 1,
                category_id: category_ids[det.class_name.as_str()],
                bbox: vec![rect.x, rect.y, rect.width, rect.height],
                segmentation,
                score: Some(f64::from(det.confidence) / 100.0),
                area: Some(rect.width * rect.height),
                iscrowd: Some(0),
            }
        })
        .collect();

    let dataset = CocoDataset {
        images: Vec::new(),
        annotations,
        categories,
    };
    Ok(serde_json::to_string_pretty(&dataset)?)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "images": [{"id": 1, "file_name": "scan.png", "width": 512, "height": 512}],
            "annotations": [{
                "id": 1,
                "image_id": 1,
                "category_id": 7,
                "bbox": [10.0, 20.0, 30.0, 40.0],
                "score": 0.8734
            }],
            "categories": [{"id": 7, "name": "Knife"}]
        })
        .to_string()
    }

    #[test]
    fn test_bbox_width_height_to_corners() {
        let dets = parse_coco_detections(&sample_json(), View::Top, "alg1").unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bounding_box, BoundingBox::new(10.0, 20.0, 40.0, 60.0));
    }

    #[test]
    fn test_score_floors_to_percentage() {
        let dets = parse_coco_detections(&sample_json(), View::Top, "alg1").unwrap();
        assert_eq!(dets[0].confidence, 87.0);
    }

    #[test]
    fn test_class_name_lowercased() {
        let dets = parse_coco_detections(&sample_json(), View::Side, "alg1").unwrap();
        assert_eq!(dets[0].class_name, "knife");
        assert_eq!(dets[0].view, View::Side);
        assert_eq!(dets[0].algorithm, "alg1");
    }

    #[test]
    fn test_missing_score_means_ground_truth() {
        let json = serde_json::json!({
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 1,
                "bbox": [0.0, 0.0, 5.0, 5.0]
            }],
            "categories": [{"id": 1, "name": "gun"}]
        })
        .to_string();
        let dets = parse_coco_detections(&json, View::Top, "gt").unwrap();
        assert_eq!(dets[0].confidence, 100.0);
    }

    #[test]
    fn test_unknown_category_is_error() {
        let json = serde_json::json!({
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 99,
                "bbox": [0.0, 0.0, 5.0, 5.0]
            }],
            "categories": [{"id": 1, "name": "gun"}]
        })
        .to_string();
        let err = parse_coco_detections(&json, View::Top, "alg").unwrap_err();
        assert!(matches!(err, ParseError::MissingField("category_id")));
    }

    #[test]
    fn test_bad_bbox_arity_is_error() {
        let json = serde_json::json!({
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 1,
                "bbox": [0.0, 0.0, 5.0]
            }],
            "categories": [{"id": 1, "name": "gun"}]
        })
        .to_string();
        let err = parse_coco_detections(&json, View::Top, "alg").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let err = parse_coco_detections("{not json", View::Top, "alg").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn test_segmentation_becomes_polygon_mask() {
        let json = serde_json::json!({
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 1,
                "bbox": [0.0, 0.0, 10.0, 10.0],
                "segmentation": [[0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]],
                "score": 0.5
            }],
            "categories": [{"id": 1, "name": "gun"}]
        })
        .to_string();
        let dets = parse_coco_detections(&json, View::Top, "alg").unwrap();
        let Mask::Polygon(verts) = &dets[0].mask else {
            panic!("expected polygon mask");
        };
        assert_eq!(verts.len(), 4);
        // Vertex at the box corner is pinned by its anchors.
        assert_eq!(verts[2].x, 10.0);
        assert_eq!(verts[2].anchor.right, 0.0);
        assert_eq!(verts[2].anchor.bottom, 0.0);
    }

    #[test]
    fn test_degenerate_segmentation_is_box_only() {
        let json = serde_json::json!({
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 1,
                "bbox": [0.0, 0.0, 10.0, 10.0],
                "segmentation": [[0.0, 0.0, 10.0, 0.0]],
                "score": 0.5
            }],
            "categories": [{"id": 1, "name": "gun"}]
        })
        .to_string();
        let dets = parse_coco_detections(&json, View::Top, "alg").unwrap();
        assert!(dets[0].mask.is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let dets = parse_coco_detections(&sample_json(), View::Top, "alg1").unwrap();
        let out = serialize_coco_detections(&dets).unwrap();
        let back = parse_coco_detections(&out, View::Top, "alg1").unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].bounding_box, dets[0].bounding_box);
        assert_eq!(back[0].class_name, "knife");
        // 87 → 0.87 → floor(87.000…) = 87.
        assert_eq!(back[0].confidence, 87.0);
    }
}
