//! Immutable value types produced by the parsers and the sanitizer.

pub mod member;
pub mod progress;
pub mod sanitize;

pub use member::{ArchiveProperties, ArchiveSummary, Listing, MemberKind, MemberRecord};
pub use progress::ProgressEvent;
pub use sanitize::{SanitizationDecision, SanitizationReason, SeenNames};
