use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

/// Which rule changed a name. Ordered by rule application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SanitizationReason {
    InvalidCharacter,
    ReservedName,
    TrailingSpaceOrDot,
    LengthExceeded,
    NameCollision,
    PathTraversal,
}

impl SanitizationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCharacter => "invalid-character",
            Self::ReservedName => "reserved-name",
            Self::TrailingSpaceOrDot => "trailing-space-or-dot",
            Self::LengthExceeded => "length-exceeded",
            Self::NameCollision => "name-collision",
            Self::PathTraversal => "path-traversal",
        }
    }
}

impl std::fmt::Display for SanitizationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of sanitizing one candidate name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizationDecision {
    pub original_name: String,
    pub final_name: String,
    pub changed: bool,
    pub reasons: BTreeSet<SanitizationReason>,
}

impl SanitizationDecision {
    pub fn fired(&self, reason: SanitizationReason) -> bool {
        self.reasons.contains(&reason)
    }
}

/// Names already handed out during one extraction pass.
///
/// Comparison is case-insensitive, as on the file systems that need
/// sanitization. Never share one instance across operations.
#[derive(Debug, Clone, Default)]
pub struct SeenNames {
    names: HashSet<String>,
}

impl SeenNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&fold(name))
    }

    /// Returns `false` if the name was already registered.
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(fold(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}
