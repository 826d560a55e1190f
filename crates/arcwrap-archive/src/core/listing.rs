//! Parser for the tool's technical listing (`l -slt`).
//!
//! The output is a banner, an optional archive block introduced by `--`, and
//! one `Key = Value` paragraph per member after a line of dashes:
//!
//! ```text
//! --
//! Path = test.7z
//! Type = 7z
//!
//! ----------
//! Path = dir1/file2.txt
//! Size = 25
//! CRC = 87654321
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::data::{ArchiveProperties, Listing, MemberKind, MemberRecord};

const MEMBER_SEPARATOR_MIN: usize = 10;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Before any separator. Paragraphs here are treated as members.
    Preamble,
    ArchiveHeader,
    Members,
}

/// Incremental listing parser.
///
/// Feed lines as they arrive with [`push_line`](Self::push_line), then call
/// [`finish`](Self::finish). Buffered and streamed output go through the
/// same state machine.
#[derive(Debug)]
pub struct ListingParser {
    section: Section,
    fields: Vec<(String, String)>,
    listing: Listing,
    paths: HashSet<String>,
}

impl Default for ListingParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingParser {
    pub fn new() -> Self {
        Self {
            section: Section::Preamble,
            fields: Vec::new(),
            listing: Listing::default(),
            paths: HashSet::new(),
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();

        if trimmed.is_empty() {
            self.flush();
            return;
        }
        if trimmed == "--" {
            self.flush();
            self.section = Section::ArchiveHeader;
            return;
        }
        if trimmed.len() >= MEMBER_SEPARATOR_MIN && trimmed.bytes().all(|b| b == b'-') {
            self.flush();
            self.section = Section::Members;
            return;
        }

        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        // Exactly one space follows the `=`; anything beyond is part of the value.
        let value = value.strip_prefix(' ').unwrap_or(value);

        // A repeated key means the next paragraph began without a blank line.
        if self.fields.iter().any(|(existing, _)| existing == key) {
            self.flush();
        }
        self.fields.push((key.to_owned(), value.to_owned()));
    }

    /// Members finalized so far.
    pub fn member_count(&self) -> usize {
        self.listing.members.len()
    }

    pub fn finish(mut self) -> Listing {
        self.flush();
        self.listing
    }

    fn flush(&mut self) {
        if self.fields.is_empty() {
            return;
        }
        let fields = std::mem::take(&mut self.fields);
        match self.section {
            Section::ArchiveHeader => merge_archive_properties(&mut self.listing.archive, fields),
            Section::Preamble | Section::Members => {
                let Some(member) = build_member(fields) else {
                    debug!("skipping listing paragraph without a path");
                    return;
                };
                if !self.paths.insert(member.path.clone()) {
                    debug!(path = %member.path, "dropping duplicate listing entry");
                    return;
                }
                self.listing.members.push(member);
            }
        }
    }
}

/// Parse a complete listing into member records, in archive order.
pub fn parse_listing<I, S>(lines: I) -> Vec<MemberRecord>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parse_listing_full(lines).members
}

/// Parse a complete listing, keeping the archive properties.
pub fn parse_listing_full<I, S>(lines: I) -> Listing
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = ListingParser::new();
    for line in lines {
        parser.push_line(line.as_ref());
    }
    parser.finish()
}

/// Parse listing text captured as one string.
pub fn parse_listing_text(text: &str) -> Listing {
    parse_listing_full(text.lines())
}

fn build_member(fields: Vec<(String, String)>) -> Option<MemberRecord> {
    let mut path = None;
    let mut member = MemberRecord {
        path: String::new(),
        uncompressed_size: 0,
        compressed_size: 0,
        is_directory: false,
        kind: MemberKind::File,
        checksum: None,
        modified: None,
        created: None,
        accessed: None,
        attributes: None,
        method: None,
        encrypted: false,
        solid: false,
        comment: None,
        extra: BTreeMap::new(),
    };
    let mut folder = false;

    for (key, value) in fields {
        match key.as_str() {
            "Path" => path = Some(value.replace('\\', "/")),
            "Size" => member.uncompressed_size = parse_size(&value),
            "Packed Size" => member.compressed_size = parse_size(&value),
            "Modified" => member.modified = parse_datetime(&value),
            "Created" => member.created = parse_datetime(&value),
            "Accessed" => member.accessed = parse_datetime(&value),
            "Attributes" => member.attributes = non_empty(value),
            "CRC" => member.checksum = parse_crc(&value),
            "Method" => member.method = non_empty(value),
            "Encrypted" => member.encrypted = is_flag_set(&value),
            "Folder" => folder = is_flag_set(&value),
            "Solid" => member.solid = is_flag_set(&value),
            "Comment" => member.comment = non_empty(value),
            _ => {
                member.extra.insert(key, value);
            }
        }
    }

    let path = path.filter(|p| !p.is_empty())?;
    member.kind = member_kind(&path, member.attributes.as_deref(), folder);
    member.is_directory = member.kind == MemberKind::Directory;
    // `dir/` and `dir` name the same member.
    member.path = path.trim_end_matches('/').to_owned();
    if member.path.is_empty() {
        return None;
    }
    Some(member)
}

fn merge_archive_properties(archive: &mut ArchiveProperties, fields: Vec<(String, String)>) {
    for (key, value) in fields {
        match key.as_str() {
            "Path" if archive.path.is_none() => archive.path = non_empty(value),
            "Type" if archive.format.is_none() => archive.format = non_empty(value),
            "Physical Size" => archive.physical_size = value.trim().parse().ok(),
            "Method" => archive.method = non_empty(value),
            "Solid" => archive.solid = Some(is_flag_set(&value)),
            _ => {
                archive.extra.insert(key, value);
            }
        }
    }
}

fn member_kind(path: &str, attributes: Option<&str>, folder: bool) -> MemberKind {
    // Windows-style attribute letters lead the string, e.g. `D`, `DA`, `A_ -rw-r--r--`.
    let directory_attr = attributes.is_some_and(|attrs| {
        attrs
            .chars()
            .take_while(|c| c.is_ascii_uppercase())
            .any(|c| c == 'D')
    });
    if folder || directory_attr || path.ends_with('/') {
        MemberKind::Directory
    } else if path.contains("->") {
        MemberKind::Symlink
    } else {
        MemberKind::File
    }
}

fn parse_size(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}

fn parse_crc(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    u32::from_str_radix(value, 16).ok()
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn is_flag_set(value: &str) -> bool {
    value.trim() == "+"
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
