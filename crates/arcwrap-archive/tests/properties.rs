use std::collections::{BTreeMap, HashSet};

use arcwrap_archive::{SeenNames, build_mapping, parse_listing_text, parse_progress, sanitize};
use proptest::prelude::*;

fn component() -> impl Strategy<Value = String> {
    prop_oneof![
        "[aA_:?][aA_:? .]{0,3}",
        Just("CON".to_owned()),
        Just("con.txt".to_owned()),
    ]
}

fn member_path() -> impl Strategy<Value = String> {
    prop::collection::vec(component(), 1..4).prop_map(|parts| parts.join("/"))
}

fn status_line() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..300).prop_map(|p| format!("{p:>3}%")),
        (0u32..300, 0u32..50, "[a-z]{1,8}").prop_map(|(p, n, item)| format!("{p}% {n} - {item}")),
        "[a-z]{1,8}".prop_map(|item| format!("- {item}")),
        "[a-z ]{0,12}",
    ]
}

fn listing_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_][a-zA-Z0-9_ .-]{0,12}", 1..4).prop_map(|parts| parts.join("/"))
}

proptest! {
    #[test]
    fn sanitized_names_are_stable(name in "\\PC{0,40}|[\\x00-\\x1f<>:\"|?* .a]{0,12}") {
        let first = sanitize(&name, &mut SeenNames::new());
        let second = sanitize(&first.final_name, &mut SeenNames::new());
        prop_assert_eq!(&second.final_name, &first.final_name);
        prop_assert!(!second.changed);
    }

    #[test]
    fn shared_scope_yields_distinct_names(names in prop::collection::vec("[aA:?<_ .]{0,6}", 1..24)) {
        let mut seen = SeenNames::new();
        let finals: Vec<_> = names.iter().map(|n| sanitize(n, &mut seen).final_name).collect();
        let unique: HashSet<_> = finals.iter().map(|n| n.to_lowercase()).collect();
        prop_assert_eq!(unique.len(), finals.len());
    }

    #[test]
    fn mapped_paths_are_distinct_and_follow_their_parents(
        names in prop::collection::btree_set(member_path(), 1..24)
    ) {
        let decisions = build_mapping(&names);
        let renamed: BTreeMap<_, _> = decisions
            .iter()
            .map(|d| (d.original_name.as_str(), d.final_name.as_str()))
            .collect();
        let final_of = |name: &str| renamed.get(name).copied().unwrap_or(name).to_owned();

        let finals: Vec<_> = names.iter().map(|n| final_of(n.as_str())).collect();
        let unique: HashSet<_> = finals.iter().map(|n| n.to_lowercase()).collect();
        let untouched: HashSet<_> = names
            .iter()
            .filter(|n| !renamed.contains_key(n.as_str()))
            .map(|n| n.to_lowercase())
            .collect();
        let clashing_untouched = names.len() - renamed.len() - untouched.len();
        prop_assert_eq!(unique.len() + clashing_untouched, finals.len(), "{:?}", finals);

        for parent in &names {
            for child in names.iter().filter(|c| c.starts_with(&format!("{parent}/"))) {
                let expected = format!("{}/", final_of(parent.as_str()));
                prop_assert!(final_of(child.as_str()).starts_with(&expected), "{} under {}", child, parent);
            }
        }
    }

    #[test]
    fn progress_never_decreases(lines in prop::collection::vec(status_line(), 0..60)) {
        let percentages: Vec<_> = parse_progress(&lines).map(|e| e.percentage).collect();
        prop_assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{:?}", percentages);
        prop_assert!(percentages.iter().all(|p| (0.0..=100.0).contains(p)));
    }

    #[test]
    fn listing_keeps_paths_sizes_and_order(
        members in prop::collection::btree_map(listing_path(), any::<u64>(), 1..16)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    ) {
        let mut text = String::from("----------\n");
        for (path, size) in &members {
            text.push_str(&format!("Path = {path}\nSize = {size}\nAttributes = A\n\n"));
        }
        let parsed: Vec<_> = parse_listing_text(&text)
            .members
            .into_iter()
            .map(|m| (m.path, m.uncompressed_size))
            .collect();
        prop_assert_eq!(parsed, members);
    }
}
