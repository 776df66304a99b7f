//! Detection codec: conversion between on-disk study formats and the
//! internal [`Detection`](crate::Detection) representation.
//!
//! Two formats are supported:
//! - **DICOS** — DICOM-style binary tag/value datasets carrying threat
//!   sequences ([`dicos`]).
//! - **MS-COCO** — JSON annotation arrays ([`coco`]).
//!
//! The codec never performs I/O: callers (the study-container reader)
//! supply byte buffers or JSON strings and own the resulting detection
//! lists. Parsing is synchronous and pure.

pub mod coco;
pub mod dicos;

use crate::codec::dicos::Tag;

/// Study payload formats the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyFormat {
    Dicos,
    Coco,
}

/// Sniff the format of a raw study payload.
///
/// `None` means the payload is neither format; callers treat this as
/// non-fatal — an unsupported file contributes zero detections rather than
/// failing the whole import.
pub fn detect_format(bytes: &[u8]) -> Option<StudyFormat> {
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        return Some(StudyFormat::Dicos);
    }
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'{') {
        return Some(StudyFormat::Coco);
    }
    None
}

/// Scale a `[0, 1]` decimal confidence to a whole percentage.
///
/// Floors rather than rounds (0.8734 → 87); existing consumers depend on
/// the floor.
pub fn decimal_to_percentage(value: f64) -> f32 {
    (value * 100.0).floor() as f32
}

/// Errors surfaced while decoding a study payload.
///
/// Malformed files are explicit, typed failures identifying what was
/// missing or broken — never a panic, and never silently zero detections.
#[derive(Debug)]
pub enum ParseError {
    /// A required DICOS tag was absent from the dataset or threat item.
    MissingTag(Tag),
    /// A required COCO field was absent or unresolvable.
    MissingField(&'static str),
    /// Structurally invalid data (bad element, wrong arity, etc.).
    Malformed(String),
    /// The binary payload ended mid-element.
    Truncated { offset: usize },
    /// Invalid JSON in a COCO payload.
    Json(serde_json::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTag(tag) => write!(f, "missing required tag {tag}"),
            Self::MissingField(field) => write!(f, "missing required field {field:?}"),
            Self::Malformed(msg) => write!(f, "malformed payload: {msg}"),
            Self::Truncated { offset } => write!(f, "payload truncated at byte {offset}"),
            Self::Json(e) => write!(f, "invalid JSON: {e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
