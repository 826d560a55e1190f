use serde::Serialize;

/// One progress sample from a running operation.
///
/// Within one operation, `percentage` never decreases across delivered
/// events. A final 100% sample is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// In `[0, 100]`.
    pub percentage: f64,
    /// Member currently being processed, if the tool named one.
    pub current_item: Option<String>,
    /// Estimate: `total_bytes` scaled by `percentage`, rounded. The tool
    /// never reports bytes done, so this is absent without a total.
    pub bytes_processed: Option<u64>,
    pub total_bytes: Option<u64>,
    pub files_processed: Option<u64>,
}
