//! Filename sanitization for restrictive target file systems.
//!
//! Rules, applied in order:
//!
//! 1. Forbidden characters (`< > : " | ? *`, U+0000..U+001F) become `_`.
//! 2. Reserved device names (`CON`, `PRN`, `AUX`, `NUL`, `COM1`-`COM9`,
//!    `LPT1`-`LPT9`) get `_file` appended to the stem.
//! 3. Trailing spaces and dots are stripped.
//! 4. Names over 255 bytes are truncated and tagged with a hash of the
//!    original name.
//! 5. Collisions with already issued names get `_1`, `_2`, ... appended
//!    before the extension. [`build_mapping`] settles them per directory.
//!
//! Nothing here touches the file system.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sha2::{Digest, Sha256};

use crate::data::{SanitizationDecision, SanitizationReason, SeenNames};

pub const SUBSTITUTE: char = '_';
pub const RESERVED_SUFFIX: &str = "_file";
pub const EMPTY_NAME: &str = "unnamed_file";
pub const MAX_NAME_BYTES: usize = 255;

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '|', '?', '*'];
const HASH_HEX_LEN: usize = 8;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a single name and register the result in `seen`.
pub fn sanitize(name: &str, seen: &mut SeenNames) -> SanitizationDecision {
    let mut reasons = BTreeSet::new();
    let component = sanitize_component(name, &mut reasons);
    let final_name = disambiguate(component, seen, &mut reasons);
    decision(name, final_name, reasons)
}

/// Sanitize a member path component by component.
///
/// Both `/` and `\` separate components. Empty, `.` and `..` components are
/// dropped. Rules 1-4 apply per component; rule 5 applies to the joined path.
pub fn sanitize_path(path: &str, seen: &mut SeenNames) -> SanitizationDecision {
    let mut reasons = BTreeSet::new();
    let mut parts = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" => {}
            "." | ".." => {
                reasons.insert(SanitizationReason::PathTraversal);
            }
            _ => parts.push(sanitize_component(component, &mut reasons)),
        }
    }
    let joined = if parts.is_empty() {
        EMPTY_NAME.to_owned()
    } else {
        parts.join("/")
    };
    let final_name = disambiguate(joined, seen, &mut reasons);
    decision(path, final_name, reasons)
}

/// Whether [`sanitize_path`] would rewrite `path`, ignoring separator style.
pub fn needs_sanitization(path: &str) -> bool {
    sanitize_path(path, &mut SeenNames::new()).final_name != path.replace('\\', "/")
}

/// Decisions for every name that needs rewriting, in input order.
///
/// Names and directory prefixes that are already safe are registered first so
/// a rewritten name never lands on an untouched one. Directory prefixes are resolved once and
/// collisions are settled among siblings, so every member below a renamed
/// directory moves with it.
pub fn build_mapping<I, S>(names: I) -> Vec<SanitizationDecision>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names: Vec<S> = names.into_iter().collect();
    let mut tree = TreeMapper::default();
    let mut pending = Vec::new();
    for name in &names {
        let name = name.as_ref();
        let (parts, _) = split_components(name);
        tree.register_clean(&parts[..clean_prefix_len(&parts)]);
        if needs_sanitization(name) {
            pending.push(name);
        }
    }
    pending
        .into_iter()
        .map(|name| {
            let (parts, traversal) = split_components(name);
            let (final_name, mut reasons) = tree.resolve(&parts);
            if traversal {
                reasons.insert(SanitizationReason::PathTraversal);
            }
            decision(name, final_name, reasons)
        })
        .collect()
}

/// Prefix-by-prefix resolution behind [`build_mapping`].
#[derive(Debug, Default)]
struct TreeMapper {
    /// Original prefix to its final prefix and the reasons collected on the way.
    resolved: HashMap<String, (String, BTreeSet<SanitizationReason>)>,
    /// Every final prefix issued so far.
    seen: SeenNames,
}

impl TreeMapper {
    /// Claim prefixes that keep their names before anything is rewritten.
    fn register_clean(&mut self, parts: &[&str]) {
        let mut key = String::new();
        for part in parts {
            push_component(&mut key, part);
            self.seen.insert(&key);
            self.resolved
                .entry(key.clone())
                .or_insert_with(|| (key.clone(), BTreeSet::new()));
        }
    }

    fn resolve(&mut self, parts: &[&str]) -> (String, BTreeSet<SanitizationReason>) {
        let mut key = String::new();
        let mut parent = (String::new(), BTreeSet::new());
        for part in parts {
            push_component(&mut key, part);
            if let Some(done) = self.resolved.get(&key) {
                parent = done.clone();
                continue;
            }
            let (mut path, mut reasons) = parent;
            let component = sanitize_component(part, &mut reasons);
            push_component(&mut path, &component);
            // Parents are already unique, so a whole-path check is a sibling check.
            let final_path = disambiguate(path, &mut self.seen, &mut reasons);
            self.resolved.insert(key.clone(), (final_path.clone(), reasons.clone()));
            parent = (final_path, reasons);
        }
        parent
    }
}

/// Components of `path` with empty, `.` and `..` dropped, and whether any
/// `.` or `..` was seen. A path with nothing left yields one empty component.
fn split_components(path: &str) -> (Vec<&str>, bool) {
    let mut traversal = false;
    let mut parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|component| match *component {
            "" => false,
            "." | ".." => {
                traversal = true;
                false
            }
            _ => true,
        })
        .collect();
    if parts.is_empty() {
        parts.push("");
    }
    (parts, traversal)
}

/// Leading components that rules 1-4 leave alone.
fn clean_prefix_len(parts: &[&str]) -> usize {
    parts
        .iter()
        .take_while(|part| sanitize_component(part, &mut BTreeSet::new()) == **part)
        .count()
}

fn push_component(path: &mut String, component: &str) {
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(component);
}

/// Original-to-final lookup over [`build_mapping`].
pub fn mapping_table(decisions: &[SanitizationDecision]) -> BTreeMap<&str, &str> {
    decisions
        .iter()
        .map(|d| (d.original_name.as_str(), d.final_name.as_str()))
        .collect()
}

fn decision(original: &str, final_name: String, reasons: BTreeSet<SanitizationReason>) -> SanitizationDecision {
    SanitizationDecision {
        original_name: original.to_owned(),
        changed: final_name != original,
        final_name,
        reasons,
    }
}

/// Rules 1-4 on one path component.
fn sanitize_component(original: &str, reasons: &mut BTreeSet<SanitizationReason>) -> String {
    let mut name: String = original
        .chars()
        .map(|c| if is_forbidden(c) { SUBSTITUTE } else { c })
        .collect();
    if name != original {
        reasons.insert(SanitizationReason::InvalidCharacter);
    }

    if let Some(renamed) = rename_reserved(&name) {
        name = renamed;
        reasons.insert(SanitizationReason::ReservedName);
    }

    let stripped = name.trim_end_matches([' ', '.']);
    if stripped.len() != name.len() {
        reasons.insert(SanitizationReason::TrailingSpaceOrDot);
        name = stripped.to_owned();
    }
    if name.is_empty() {
        return EMPTY_NAME.to_owned();
    }

    if name.len() > MAX_NAME_BYTES {
        reasons.insert(SanitizationReason::LengthExceeded);
        name = shorten(&name, original);
    }
    name
}

fn is_forbidden(c: char) -> bool {
    FORBIDDEN.contains(&c) || u32::from(c) < 0x20
}

fn rename_reserved(name: &str) -> Option<String> {
    let (stem, rest) = match name.find('.') {
        Some(dot) => name.split_at(dot),
        None => (name, ""),
    };
    let stem = stem.trim_end_matches([' ', '.']);
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
        .then(|| format!("{stem}{RESERVED_SUFFIX}{rest}"))
}

fn shorten(name: &str, original: &str) -> String {
    let digest = hex::encode(Sha256::digest(original.as_bytes()));
    let hash = &digest[..HASH_HEX_LEN];
    let (mut stem, mut ext) = split_extension(name);
    if ext.len() + HASH_HEX_LEN + 1 >= MAX_NAME_BYTES {
        stem = name;
        ext = "";
    }
    let budget = MAX_NAME_BYTES - ext.len() - HASH_HEX_LEN - 1;
    format!("{}_{hash}{ext}", truncate_to(stem, budget))
}

/// Rule 5.
fn disambiguate(name: String, seen: &mut SeenNames, reasons: &mut BTreeSet<SanitizationReason>) -> String {
    if !seen.contains(&name) {
        seen.insert(&name);
        return name;
    }
    reasons.insert(SanitizationReason::NameCollision);
    let mut counter = 1usize;
    loop {
        let candidate = with_counter(&name, counter);
        if !seen.contains(&candidate) {
            seen.insert(&candidate);
            return candidate;
        }
        counter += 1;
    }
}

fn with_counter(name: &str, counter: usize) -> String {
    let (stem, ext) = split_extension(name);
    let suffix = format!("_{counter}{ext}");
    let start = stem.rfind('/').map_or(0, |slash| slash + 1);
    let budget = MAX_NAME_BYTES.saturating_sub(suffix.len());
    let stem = if stem.len() - start > budget {
        &stem[..start + truncate_to(&stem[start..], budget).len()]
    } else {
        stem
    };
    format!("{stem}{suffix}")
}

/// Split the last component's extension (including the dot). A leading dot
/// is part of the stem, so `.profile` has no extension.
fn split_extension(name: &str) -> (&str, &str) {
    let start = name.rfind('/').map_or(0, |slash| slash + 1);
    match name[start..].rfind('.') {
        None | Some(0) => (name, ""),
        Some(dot) => name.split_at(start + dot),
    }
}

fn truncate_to(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
