//! scanfuse-core — multi-algorithm detection fusion for X-ray scan studies.
//!
//! The pipeline stages are:
//!
//! 1. **Codec** – parse per-algorithm detection records from DICOS (binary
//!    tag-based) or MS-COCO (JSON) study payloads.
//! 2. **Clustering** – group detections of the same view and class into
//!    correspondence groups by bounding-box IoU.
//! 3. **Fusion** – reduce each correspondence group to a single
//!    confidence-weighted consensus detection (WBF).
//! 4. **Geometry** – point/polygon predicates, polygon rasterization, and
//!    the anchor arithmetic that keeps polygon masks attached to their
//!    bounding box during interactive edits.
//!
//! The crate is pure computation: file and archive I/O belongs to the
//! caller, which hands byte buffers / JSON strings to the codec and owns
//! the resulting detection lists.

pub mod codec;
pub mod fusion;
pub mod geometry;

use serde::{Deserialize, Serialize};

/// Algorithm label carried by fused (summarized) detections.
pub const WBF_ALGORITHM: &str = "Summarized - WBF";

/// Which physical scan orientation a detection belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Top,
    Side,
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Top => write!(f, "top"),
            Self::Side => write!(f, "side"),
        }
    }
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "side" => Ok(Self::Side),
            other => Err(format!("unknown view: {other:?} (expected top or side)")),
        }
    }
}

/// Axis-aligned box stored as diagonal corners `(x1, y1)-(x2, y2)` in image
/// pixels.
///
/// This is the detection-record convention. The geometry kernel's
/// `[x, y, width, height]` convention is a separate type ([`Rect`]); the two
/// are never interchanged implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Corner-ordered copy: `x1 <= x2`, `y1 <= y2`.
    ///
    /// Upstream producers are inconsistent about corner order, so every
    /// ingestion path normalizes.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Convert to the `[x, y, width, height]` convention.
    pub fn to_rect(&self) -> Rect {
        let n = self.normalized();
        Rect {
            x: n.x1,
            y: n.y1,
            width: n.width(),
            height: n.height(),
        }
    }
}

/// Axis-aligned rectangle as origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert to diagonal-corner form.
    pub fn to_bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x1: self.x,
            y1: self.y,
            x2: self.x + self.width,
            y2: self.y + self.height,
        }
    }
}

/// A mask vertex's position as percentage offsets from each bounding-box
/// edge.
///
/// Anchors are recomputed whenever the box changes so the polygon deforms
/// consistently with box edits: an anchor of 0 against an edge pins the
/// vertex to that edge.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnchorPoints {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

/// One vertex of a polygon mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskVertex {
    pub x: f64,
    pub y: f64,
    pub anchor: AnchorPoints,
}

impl MaskVertex {
    /// Vertex with zeroed anchors (anchors filled in by
    /// [`geometry::mask_anchor_points`]).
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            anchor: AnchorPoints::default(),
        }
    }
}

/// Flattened row-major 0/1 raster covering a sub-rectangle of the image,
/// anchored at `origin` with size `extent` (width, height).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMask {
    pub bitmap: Vec<u8>,
    pub origin: [i32; 2],
    pub extent: [u32; 2],
}

/// Authoritative shape of a detection beyond its bounding box.
///
/// At most one shape representation is carried; a box-only detection is
/// `Mask::None`. Fused detections are always box-only (shape fusion is not
/// attempted).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mask {
    #[default]
    None,
    Polygon(Vec<MaskVertex>),
    Raster(RasterMask),
}

impl Mask {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One candidate (or fused) object identification.
///
/// Raw detections are produced by the codec when a study is opened and are
/// read-only inputs to clustering/fusion. Fused detections are newly
/// constructed, never mutated, and regenerated whenever the raw set
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub view: View,
    /// Normalized lowercase category label.
    pub class_name: String,
    /// Name/version of the detecting algorithm, or [`WBF_ALGORITHM`] for
    /// fused results.
    pub algorithm: String,
    pub bounding_box: BoundingBox,
    /// Confidence in `[0, 100]`.
    pub confidence: f32,
    #[serde(default)]
    pub mask: Mask,
    /// Display color; assigned by the presentation layer, passed through
    /// untouched here.
    #[serde(default)]
    pub color: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub selected: bool,
    pub uuid: String,
}

fn default_visible() -> bool {
    true
}

impl Detection {
    /// Raw detection with fresh identity and default presentation state.
    /// The bounding box is normalized on construction.
    pub fn new(
        view: View,
        class_name: impl Into<String>,
        algorithm: impl Into<String>,
        bounding_box: BoundingBox,
        confidence: f32,
        mask: Mask,
    ) -> Self {
        Self {
            view,
            class_name: class_name.into(),
            algorithm: algorithm.into(),
            bounding_box: bounding_box.normalized(),
            confidence,
            mask,
            color: String::new(),
            visible: true,
            selected: false,
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
