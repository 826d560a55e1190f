use std::collections::HashSet;

use arcwrap_archive::{SanitizationReason, SeenNames, build_mapping, sanitize, sanitize_path};

const AWKWARD: &[&str] = &[
    "CON.txt",
    "con",
    "file<>*.zip",
    "a:b:c",
    "trailing...",
    "spaces   ",
    "  leading and trailing  ",
    "",
    "\u{1}\u{2}ctl",
    "LPT9.tar.gz",
    "日本語:ファイル.txt",
    "?",
];

#[test]
fn sanitize_is_idempotent_under_fresh_state() {
    let long = "z".repeat(600);
    let names = AWKWARD.iter().copied().chain([long.as_str()]);
    for name in names {
        let first = sanitize(name, &mut SeenNames::new());
        let second = sanitize(&first.final_name, &mut SeenNames::new());
        let third = sanitize(name, &mut SeenNames::new());
        assert_eq!(second.final_name, third.final_name, "input {name:?}");
        assert!(!second.changed, "input {name:?}");
    }
}

#[test]
fn colliding_names_stay_distinct() {
    let mut seen = SeenNames::new();
    let variants = ["a:b.txt", "a*b.txt", "a?b.txt", "A|B.txt", "a_b.txt"];
    let finals: Vec<_> = variants.iter().map(|n| sanitize(n, &mut seen).final_name).collect();
    let unique: HashSet<_> = finals.iter().map(|n| n.to_lowercase()).collect();
    assert_eq!(unique.len(), finals.len(), "{finals:?}");
}

#[test]
fn deterministic_for_same_state() {
    let mut left = SeenNames::new();
    let mut right = SeenNames::new();
    for name in AWKWARD {
        assert_eq!(sanitize(name, &mut left), sanitize(name, &mut right));
    }
}

#[test]
fn reasons_follow_rule_order() {
    let d = sanitize("CON:. ", &mut SeenNames::new());
    let reasons: Vec<_> = d.reasons.iter().copied().collect();
    assert_eq!(
        reasons,
        [SanitizationReason::InvalidCharacter, SanitizationReason::TrailingSpaceOrDot]
    );
    assert_eq!(d.final_name, "CON_");
}

#[test]
fn mapping_is_unique_across_an_archive() {
    let names = [
        "docs/read:me.txt",
        "docs/read?me.txt",
        "docs/read_me.txt",
        "CON/AUX.txt",
        "ok/fine.txt",
    ];
    let decisions = build_mapping(names);
    let mut finals: Vec<_> = decisions.iter().map(|d| d.final_name.clone()).collect();
    finals.extend(["docs/read_me.txt".to_string(), "ok/fine.txt".to_string()]);
    let unique: HashSet<_> = finals.iter().collect();
    assert_eq!(unique.len(), finals.len(), "{finals:?}");
    assert!(decisions.iter().any(|d| d.final_name == "CON_file/AUX_file.txt"));
}

#[test]
fn path_sanitizer_never_yields_traversal() {
    for path in ["../x", "a/../../b", "./.././c", "a\\..\\d"] {
        let d = sanitize_path(path, &mut SeenNames::new());
        assert!(!d.final_name.split('/').any(|c| c == ".." || c == "."), "{path}");
        assert!(d.fired(SanitizationReason::PathTraversal));
    }
}
