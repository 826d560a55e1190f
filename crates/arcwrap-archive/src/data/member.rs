use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{Error, Result};

/// What a member is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    File,
    Directory,
    Symlink,
}

/// One archive member as reported by a detailed listing.
///
/// `compressed_size <= uncompressed_size` does not hold for stored or
/// incompressible members and is never assumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord {
    /// Member path with `\` normalized to `/` and no trailing `/`. Unique within one listing.
    pub path: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub is_directory: bool,
    pub kind: MemberKind,
    pub checksum: Option<u32>,
    pub modified: Option<NaiveDateTime>,
    pub created: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDateTime>,
    /// Attribute string exactly as the tool printed it.
    pub attributes: Option<String>,
    pub method: Option<String>,
    pub encrypted: bool,
    pub solid: bool,
    pub comment: Option<String>,
    /// Keys this layer does not model, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

impl MemberRecord {
    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// Properties of the archive itself, from the block before the members.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveProperties {
    pub path: Option<String>,
    pub format: Option<String>,
    pub physical_size: Option<u64>,
    pub method: Option<String>,
    pub solid: Option<bool>,
    pub extra: BTreeMap<String, String>,
}

/// Aggregate statistics over a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveSummary {
    pub file_count: usize,
    pub directory_count: usize,
    pub total_uncompressed: u64,
    pub total_compressed: u64,
    /// `1 - compressed / uncompressed`, or 0 for an empty archive.
    pub compression_ratio: f64,
    /// Most frequent method among members that report one.
    pub dominant_method: Option<String>,
}

/// A parsed detailed listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Listing {
    pub archive: ArchiveProperties,
    pub members: Vec<MemberRecord>,
}

impl Listing {
    pub fn get(&self, path: &str) -> Option<&MemberRecord> {
        let wanted = path.replace('\\', "/");
        self.members.iter().find(|member| member.path == wanted.trim_end_matches('/'))
    }

    /// Like [`get`](Self::get), with absence reported as an error.
    pub fn require(&self, path: &str) -> Result<&MemberRecord> {
        self.get(path).ok_or_else(|| Error::MemberNotFound {
            path: path.to_owned(),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn summary(&self) -> ArchiveSummary {
        let mut file_count = 0;
        let mut directory_count = 0;
        let mut total_uncompressed = 0u64;
        let mut total_compressed = 0u64;
        let mut methods: BTreeMap<&str, usize> = BTreeMap::new();

        for member in &self.members {
            if member.is_directory {
                directory_count += 1;
            } else {
                file_count += 1;
            }
            total_uncompressed = total_uncompressed.saturating_add(member.uncompressed_size);
            total_compressed = total_compressed.saturating_add(member.compressed_size);
            if let Some(method) = member.method.as_deref().filter(|m| !m.is_empty()) {
                *methods.entry(method).or_default() += 1;
            }
        }

        let compression_ratio = if total_uncompressed == 0 {
            0.0
        } else {
            1.0 - total_compressed as f64 / total_uncompressed as f64
        };

        // Ties resolve to the lexicographically smallest method.
        let dominant_method = methods
            .iter()
            .fold(None::<(&str, usize)>, |best, (&method, &count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((method, count)),
            })
            .map(|(method, _)| method.to_owned());

        ArchiveSummary {
            file_count,
            directory_count,
            total_uncompressed,
            total_compressed,
            compression_ratio,
            dominant_method,
        }
    }
}

impl IntoIterator for Listing {
    type Item = MemberRecord;
    type IntoIter = std::vec::IntoIter<MemberRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}
