//! DICOS binary codec.
//!
//! DICOS threat-detection reports are DICOM-style datasets: a stream of
//! explicit-VR little-endian tag/value elements, with nested sequences
//! (`SQ`) of items. This module implements:
//!
//! - a minimal dataset reader (preamble + `DICM` magic, explicit VR LE,
//!   defined- and undefined-length sequences),
//! - extraction of threat-sequence items into [`Detection`]s,
//! - the inverse writer producing a self-contained DICOS blob per
//!   detection, with fixed placeholder header fields.
//!
//! The reader copies element values into owned buffers (including mask
//! bitmaps), so parsed detections never borrow from the input.

use std::collections::BTreeMap;

use crate::codec::{decimal_to_percentage, ParseError};
use crate::{BoundingBox, Detection, Mask, RasterMask, View};

// ── Tags ───────────────────────────────────────────────────────────────────

/// A DICOM/DICOS data-element tag: (group, element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

/// Per-threat raster mask base origin, (x, y, z) floats.
pub const MASK_BASE_ORIGIN: Tag = Tag::new(0x4010, 0x1004);
/// Per-threat raster mask extents, (w, h, d) floats.
pub const MASK_EXTENTS: Tag = Tag::new(0x4010, 0x1005);
/// Per-threat raster mask bitmap, one byte per pixel.
pub const MASK_BITMAP: Tag = Tag::new(0x4010, 0x1006);
/// Sequence of detected-threat items.
pub const THREAT_SEQUENCE: Tag = Tag::new(0x4010, 0x1011);
/// Object class description string.
pub const THREAT_CATEGORY_DESCRIPTION: Tag = Tag::new(0x4010, 0x1013);
/// Assessment probability, a `[0, 1]` float.
pub const ASSESSMENT_PROBABILITY: Tag = Tag::new(0x4010, 0x1016);
/// Detection algorithm name and version.
pub const THREAT_DETECTION_ALGORITHM: Tag = Tag::new(0x4010, 0x1029);
/// Bounding polygon as flat (x, y, z) float triples.
pub const BOUNDING_POLYGON: Tag = Tag::new(0x4010, 0x101D);
/// Number of alarm objects in the report.
pub const NUMBER_OF_ALARM_OBJECTS: Tag = Tag::new(0x4010, 0x1034);

const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
const ITEM_DELIMITER: Tag = Tag::new(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITER: Tag = Tag::new(0xFFFE, 0xE0DD);

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

// ── Dataset model ──────────────────────────────────────────────────────────

/// Value of a data element: raw bytes, or nested item datasets for `SQ`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Items(Vec<DataSet>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub vr: [u8; 2],
    pub value: Value,
}

/// A parsed tag-ordered dataset (top-level or sequence item).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    elements: BTreeMap<Tag, Element>,
}

impl DataSet {
    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.elements.get(&tag)
    }

    fn bytes(&self, tag: Tag) -> Option<&[u8]> {
        match &self.get(tag)?.value {
            Value::Bytes(b) => Some(b),
            Value::Items(_) => None,
        }
    }

    /// Nested sequence items, if the tag is present and is a sequence.
    pub fn items(&self, tag: Tag) -> Option<&[DataSet]> {
        match &self.get(tag)?.value {
            Value::Items(items) => Some(items),
            Value::Bytes(_) => None,
        }
    }

    /// 4-byte LE float array (`FL`).
    pub fn float_values(&self, tag: Tag) -> Option<Vec<f32>> {
        let bytes = self.bytes(tag)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    /// Text value with trailing padding stripped.
    pub fn string_value(&self, tag: Tag) -> Option<String> {
        let bytes = self.bytes(tag)?;
        Some(
            String::from_utf8_lossy(bytes)
                .trim_end_matches(['\0', ' '])
                .to_string(),
        )
    }

    /// Unsigned short, accepting both binary (`US`) and integer-string
    /// encodings.
    pub fn ushort_value(&self, tag: Tag) -> Option<u16> {
        let bytes = self.bytes(tag)?;
        if bytes.len() == 2 {
            return Some(u16::from_le_bytes([bytes[0], bytes[1]]));
        }
        self.string_value(tag)?.trim().parse().ok()
    }

    fn require_floats(&self, tag: Tag) -> Result<Vec<f32>, ParseError> {
        self.float_values(tag).ok_or(ParseError::MissingTag(tag))
    }

    fn require_string(&self, tag: Tag) -> Result<String, ParseError> {
        self.string_value(tag).ok_or(ParseError::MissingTag(tag))
    }

    fn insert(&mut self, element: Element) {
        self.elements.insert(element.tag, element);
    }
}

// ── Reader ─────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(ParseError::Truncated { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_tag(&mut self) -> Result<Tag, ParseError> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;
        Ok(Tag::new(group, element))
    }
}

/// Parse a full DICOS dataset from a byte buffer.
///
/// A 128-byte preamble followed by the `DICM` magic is skipped when
/// present; bare element streams parse too.
pub fn parse_dataset(buffer: &[u8]) -> Result<DataSet, ParseError> {
    let mut reader = Reader::new(buffer);
    if buffer.len() >= 132 && &buffer[128..132] == b"DICM" {
        reader.pos = 132;
    }
    let end = buffer.len();
    parse_dataset_region(&mut reader, end, false)
}

/// VRs that use the long (reserved + 32-bit length) element form.
fn is_long_vr(vr: &[u8; 2]) -> bool {
    matches!(vr, b"OB" | b"OW" | b"OF" | b"OD" | b"SQ" | b"UC" | b"UR" | b"UT" | b"UN")
}

fn parse_dataset_region(
    reader: &mut Reader<'_>,
    end: usize,
    stop_at_item_delimiter: bool,
) -> Result<DataSet, ParseError> {
    let mut dataset = DataSet::default();
    while reader.pos < end {
        let tag = reader.read_tag()?;
        if tag == ITEM_DELIMITER && stop_at_item_delimiter {
            reader.read_u32()?; // zero length
            break;
        }
        if tag.group == 0xFFFE {
            return Err(ParseError::Malformed(format!(
                "unexpected delimiter {tag} outside sequence"
            )));
        }

        let vr_bytes = reader.take(2)?;
        let vr = [vr_bytes[0], vr_bytes[1]];
        if !vr.iter().all(u8::is_ascii_uppercase) {
            return Err(ParseError::Malformed(format!(
                "invalid VR {:?} at tag {tag} (implicit-VR datasets are not supported)",
                String::from_utf8_lossy(&vr)
            )));
        }

        let length = if is_long_vr(&vr) {
            reader.take(2)?; // reserved
            reader.read_u32()?
        } else {
            u32::from(reader.read_u16()?)
        };

        let value = if &vr == b"SQ" {
            Value::Items(parse_sequence(reader, length)?)
        } else if length == UNDEFINED_LENGTH {
            return Err(ParseError::Malformed(format!(
                "undefined length on non-sequence element {tag}"
            )));
        } else {
            Value::Bytes(reader.take(length as usize)?.to_vec())
        };

        dataset.insert(Element { tag, vr, value });
    }
    Ok(dataset)
}

fn parse_sequence(reader: &mut Reader<'_>, length: u32) -> Result<Vec<DataSet>, ParseError> {
    let end = if length == UNDEFINED_LENGTH {
        reader.buf.len()
    } else {
        reader
            .pos
            .checked_add(length as usize)
            .filter(|&e| e <= reader.buf.len())
            .ok_or(ParseError::Truncated { offset: reader.pos })?
    };

    let mut items = Vec::new();
    while reader.pos < end {
        let tag = reader.read_tag()?;
        if tag == SEQUENCE_DELIMITER {
            reader.read_u32()?; // zero length
            break;
        }
        if tag != ITEM {
            return Err(ParseError::Malformed(format!(
                "unexpected tag {tag} in sequence (expected item)"
            )));
        }
        let item_length = reader.read_u32()?;
        let item = if item_length == UNDEFINED_LENGTH {
            parse_dataset_region(reader, reader.buf.len(), true)?
        } else {
            let item_end = reader
                .pos
                .checked_add(item_length as usize)
                .filter(|&e| e <= reader.buf.len())
                .ok_or(ParseError::Truncated { offset: reader.pos })?;
            parse_dataset_region(reader, item_end, false)?
        };
        items.push(item);
    }
    Ok(items)
}

// ── Read path ──────────────────────────────────────────────────────────────

/// Parse the threat sequence of a DICOS report into detections.
///
/// A zero or absent alarm-object count, or an absent threat sequence,
/// contributes zero detections (legitimately empty report, not an error).
/// A threat item missing a required tag is a [`ParseError::MissingTag`].
pub fn parse_dicos_detections(buffer: &[u8], view: View) -> Result<Vec<Detection>, ParseError> {
    let dataset = parse_dataset(buffer)?;

    let alarm_count = dataset
        .ushort_value(NUMBER_OF_ALARM_OBJECTS)
        .unwrap_or(0);
    if alarm_count == 0 {
        return Ok(Vec::new());
    }
    let Some(items) = dataset.items(THREAT_SEQUENCE) else {
        return Ok(Vec::new());
    };

    let mut detections = Vec::new();
    for item in items.iter().take(alarm_count as usize) {
        detections.push(threat_item_to_detection(item, view)?);
    }

    tracing::debug!(%view, count = detections.len(), "parsed DICOS detections");
    Ok(detections)
}

/// Drop the z component of a flat (x, y, z) float array.
fn triples_to_points(values: &[f32]) -> Vec<[f64; 2]> {
    values
        .chunks_exact(3)
        .map(|t| [f64::from(t[0]), f64::from(t[1])])
        .collect()
}

fn threat_item_to_detection(item: &DataSet, view: View) -> Result<Detection, ParseError> {
    let polygon = item.require_floats(BOUNDING_POLYGON)?;
    let points = triples_to_points(&polygon);
    if points.len() < 2 {
        return Err(ParseError::Malformed(format!(
            "bounding polygon needs at least two (x,y,z) triples, got {} floats",
            polygon.len()
        )));
    }
    let bounding_box =
        BoundingBox::new(points[0][0], points[0][1], points[1][0], points[1][1]).normalized();

    let class_name = item
        .require_string(THREAT_CATEGORY_DESCRIPTION)?
        .to_lowercase();

    let probability = item.require_floats(ASSESSMENT_PROBABILITY)?;
    let probability = *probability
        .first()
        .ok_or(ParseError::MissingTag(ASSESSMENT_PROBABILITY))?;
    let confidence = decimal_to_percentage(f64::from(probability)).clamp(0.0, 100.0);

    let algorithm = item.require_string(THREAT_DETECTION_ALGORITHM)?;
    let mask = raster_mask_from_item(item)?;

    Ok(Detection::new(
        view,
        class_name,
        algorithm,
        bounding_box,
        confidence,
        mask,
    ))
}

/// All three mask tags present → raster mask; none present → box-only.
fn raster_mask_from_item(item: &DataSet) -> Result<Mask, ParseError> {
    let origin = item.float_values(MASK_BASE_ORIGIN);
    let extents = item.float_values(MASK_EXTENTS);
    let bitmap = item.bytes(MASK_BITMAP);

    let (Some(origin), Some(extents), Some(bitmap)) = (origin, extents, bitmap) else {
        return Ok(Mask::None);
    };

    if origin.len() < 2 || extents.len() < 2 {
        return Err(ParseError::Malformed(
            "mask origin/extents need at least (x, y) components".to_string(),
        ));
    }

    let width = extents[0].max(0.0).floor() as u32;
    let height = extents[1].max(0.0).floor() as u32;
    let expected = (width as usize) * (height as usize);
    if bitmap.len() < expected {
        return Err(ParseError::Malformed(format!(
            "mask bitmap holds {} bytes, extents require {expected}",
            bitmap.len()
        )));
    }

    Ok(Mask::Raster(RasterMask {
        bitmap: bitmap[..expected].iter().map(|&b| u8::from(b != 0)).collect(),
        origin: [origin[0].floor() as i32, origin[1].floor() as i32],
        extent: [width, height],
    }))
}

// ── Write path ─────────────────────────────────────────────────────────────

fn put_tag(buf: &mut Vec<u8>, tag: Tag) {
    buf.extend_from_slice(&tag.group.to_le_bytes());
    buf.extend_from_slice(&tag.element.to_le_bytes());
}

/// Short-form element (16-bit length). Data must already be even-length.
fn put_element_short(buf: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], data: &[u8]) {
    put_tag(buf, tag);
    buf.extend_from_slice(vr);
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(data);
}

/// Long-form element (reserved + 32-bit length).
fn put_element_long(buf: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], data: &[u8]) {
    put_tag(buf, tag);
    buf.extend_from_slice(vr);
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

/// Text element padded to even length (space for text VRs, NUL for `UI`).
fn put_string(buf: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], text: &str) {
    let mut data = text.as_bytes().to_vec();
    if data.len() % 2 != 0 {
        data.push(if vr == b"UI" { 0 } else { b' ' });
    }
    put_element_short(buf, tag, vr, &data);
}

fn put_floats(buf: &mut Vec<u8>, tag: Tag, values: &[f32]) {
    let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    put_element_short(buf, tag, b"FL", &data);
}

fn put_ushort(buf: &mut Vec<u8>, tag: Tag, value: u16) {
    put_element_short(buf, tag, b"US", &value.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, tag: Tag, data: &[u8]) {
    let mut data = data.to_vec();
    if data.len() % 2 != 0 {
        data.push(0);
    }
    put_element_long(buf, tag, b"OB", &data);
}

/// Defined-length sequence of defined-length items.
fn put_sequence(buf: &mut Vec<u8>, tag: Tag, items: &[Vec<u8>]) {
    let mut content = Vec::new();
    for item in items {
        put_tag(&mut content, ITEM);
        content.extend_from_slice(&(item.len() as u32).to_le_bytes());
        content.extend_from_slice(item);
    }
    put_element_long(buf, tag, b"SQ", &content);
}

/// Serialize one detection as a self-contained DICOS report blob.
///
/// Patient/equipment header fields are fixed placeholders — the annotation
/// tool authors reports about bags, not patients, and downstream DICOS
/// consumers only read the threat payload. A polygon mask is reduced to
/// its bounding box here; only raster masks travel in DICOS form.
pub fn serialize_detection_to_dicos(detection: &Detection) -> Vec<u8> {
    let mut item = Vec::new();
    if let Mask::Raster(raster) = &detection.mask {
        put_floats(
            &mut item,
            MASK_BASE_ORIGIN,
            &[raster.origin[0] as f32, raster.origin[1] as f32, 0.0],
        );
        put_floats(
            &mut item,
            MASK_EXTENTS,
            &[raster.extent[0] as f32, raster.extent[1] as f32, 0.0],
        );
        put_bytes(&mut item, MASK_BITMAP, &raster.bitmap);
    }
    put_string(
        &mut item,
        THREAT_CATEGORY_DESCRIPTION,
        b"LO",
        &detection.class_name,
    );
    put_floats(
        &mut item,
        ASSESSMENT_PROBABILITY,
        &[detection.confidence / 100.0],
    );
    put_string(
        &mut item,
        THREAT_DETECTION_ALGORITHM,
        b"LO",
        &detection.algorithm,
    );
    let b = detection.bounding_box.normalized();
    put_floats(
        &mut item,
        BOUNDING_POLYGON,
        &[b.x1 as f32, b.y1 as f32, 0.0, b.x2 as f32, b.y2 as f32, 0.0],
    );

    let mut buf = vec![0u8; 128];
    buf.extend_from_slice(b"DICM");

    // File meta + placeholder header, ascending tag order.
    put_string(&mut buf, Tag::new(0x0002, 0x0010), b"UI", "1.2.840.10008.1.2.1");
    put_string(
        &mut buf,
        Tag::new(0x0008, 0x0016),
        b"UI",
        "1.2.840.10008.5.1.4.1.1.501.2.1",
    );
    put_string(
        &mut buf,
        Tag::new(0x0008, 0x0018),
        b"UI",
        "1.2.826.0.1.3680043.8.498.1",
    );
    put_string(&mut buf, Tag::new(0x0008, 0x0020), b"DA", "19700101");
    put_string(&mut buf, Tag::new(0x0008, 0x0030), b"TM", "000000");
    put_string(&mut buf, Tag::new(0x0008, 0x0060), b"CS", "TDR");
    put_string(&mut buf, Tag::new(0x0008, 0x0070), b"LO", "scanfuse");
    put_string(&mut buf, Tag::new(0x0010, 0x0010), b"PN", "UNKNOWN^UNKNOWN");
    put_string(&mut buf, Tag::new(0x0010, 0x0020), b"LO", "UNKNOWN");
    put_string(&mut buf, Tag::new(0x0010, 0x0030), b"DA", "19000101");
    put_string(&mut buf, Tag::new(0x0010, 0x0040), b"CS", "O");
    put_string(&mut buf, Tag::new(0x0020, 0x0013), b"IS", "1");

    put_sequence(&mut buf, THREAT_SEQUENCE, &[item]);
    put_ushort(&mut buf, NUMBER_OF_ALARM_OBJECTS, 1);

    buf
}

// ── Tests ──────────────────────────────────────────────────────────────────
