//! Interpretation layer for an external archiving tool's text output.
//!
//! # Architecture
//!
//! This crate follows the data / core split:
//! - [`data`] - Immutable records: members, listings, progress events, sanitization decisions
//! - [`core`] - Pure parsers and the filename sanitizer
//!
//! # Key Features
//!
//! - **Tolerant**: malformed paragraphs and unknown status lines are skipped, never fatal
//! - **Incremental**: listing and progress parsers accept lines as the tool emits them
//! - **Deterministic**: sanitization depends only on the name and the per-pass seen set

pub mod core;
pub mod data;
mod error;

pub use crate::core::{
    ListingParser, ProgressIter, ProgressParser, build_mapping, mapping_table, needs_sanitization, parse_listing,
    parse_listing_full, parse_listing_text, parse_progress, progress_stream, sanitize, sanitize_path,
};
pub use data::{
    ArchiveProperties, ArchiveSummary, Listing, MemberKind, MemberRecord, ProgressEvent, SanitizationDecision,
    SanitizationReason, SeenNames,
};
pub use error::{Error, Result};
