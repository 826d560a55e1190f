//! Pure transformations over tool output and member names.
//!
//! Nothing in this module spawns processes or touches the file system.

mod listing;
mod progress;
mod sanitize;

pub use listing::{ListingParser, parse_listing, parse_listing_full, parse_listing_text};
pub use progress::{ProgressIter, ProgressParser, parse_progress, progress_stream};
pub use sanitize::{
    EMPTY_NAME, MAX_NAME_BYTES, RESERVED_SUFFIX, SUBSTITUTE, build_mapping, mapping_table, needs_sanitization,
    sanitize, sanitize_path,
};
