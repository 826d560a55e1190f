#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arcwrap::{Coordinator, CoordinatorConfig, ErrorKind, Operation, OperationError, OperationRequest};
use parking_lot::Mutex;

/// Stand-in for the archiving tool that answers `l`, `t` and `x`.
const FAKE_TOOL: &str = r#"#!/bin/sh
case "$1" in
  l)
    printf 'Path = a.txt\nSize = 3\n\nPath = dir/b b.txt\nSize = 4\n\n'
    ;;
  t)
    printf '  0%%\n 50%% 1 T a.txt\n100%% 2 T dir/b b.txt\n'
    echo "progress noise" >&2
    ;;
  x)
    echo "ERROR: Data Error : a.txt" >&2
    exit 2
    ;;
  *)
    sleep 30
    ;;
esac
"#;

/// Stand-in whose members only extract under a staging directory, the way a
/// file system that rejects `CON.txt` and `a:b` would behave.
const NAMING_TOOL: &str = r#"#!/bin/sh
case "$1" in
  l)
    printf 'Path = CON.txt\nSize = 1\n\n'
    printf 'Path = a_b\nAttributes = D\n\nPath = a_b/x.txt\nSize = 2\n\n'
    printf 'Path = a:b\nAttributes = D\n\nPath = a:b/x.txt\nSize = 3\n\n'
    ;;
  x)
    case "$3" in
      *.arcwrap-staging-*)
        out="${3#-o}"
        mkdir -p "$out/a_b" "$out/a:b"
        printf 'c' > "$out/CON.txt"
        printf 'ab' > "$out/a_b/x.txt"
        printf 'a:b' > "$out/a:b/x.txt"
        printf '100%% 3\n'
        ;;
      *)
        echo "ERROR: Cannot create file CON.txt" >&2
        exit 2
        ;;
    esac
    ;;
esac
"#;

fn install_fake_tool(dir: &tempfile::TempDir) -> PathBuf {
    install_script(dir, FAKE_TOOL)
}

fn install_script(dir: &tempfile::TempDir, script: &str) -> PathBuf {
    let path = dir.path().join("7zz");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drives_a_real_process() {
    let dir = tempfile::tempdir().unwrap();
    let tool = install_fake_tool(&dir);
    let config = CoordinatorConfig::default().binary(tool.to_string_lossy());
    let coordinator = Coordinator::new(config);

    let listing = coordinator.list("any.7z").await.unwrap();
    assert_eq!(listing.names(), ["a.txt", "dir/b b.txt"]);
    assert_eq!(listing.summary().total_uncompressed, 7);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let request = OperationRequest::new(Operation::test("any.7z")).on_progress(move |event| {
        sink.lock().push((event.percentage, event.current_item.clone()));
    });
    coordinator.submit(request).wait().await.unwrap();
    let seen = seen.lock().clone();
    assert_eq!(seen.first().map(|(p, _)| *p), Some(0.0));
    assert_eq!(seen.last(), Some(&(100.0, Some("dir/b b.txt".to_owned()))));

    let err = coordinator.extract("any.7z", dir.path().join("out")).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    assert_eq!(err.kind(), ErrorKind::NonZeroExit);
    assert!(err.to_string().contains("Data Error"));

    let slow = OperationRequest::new(Operation::Raw {
        args: vec!["hang".to_owned()],
    })
    .timeout(Duration::from_millis(200));
    let err = coordinator.submit(slow).wait().await.unwrap_err();
    assert!(matches!(err, OperationError::OperationTimedOut { .. }));
}

#[tokio::test]
async fn missing_tool_is_unavailable() {
    let coordinator = Coordinator::new(CoordinatorConfig::default().binary("/nonexistent/bin/7zz"));
    let err = coordinator.test("a.7z").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn naming_failure_is_retried_through_staging() {
    let dir = tempfile::tempdir().unwrap();
    let tool = install_script(&dir, NAMING_TOOL);
    let coordinator = Coordinator::new(CoordinatorConfig::default().binary(tool.to_string_lossy()));
    let out = dir.path().join("out");

    let renames = coordinator.extract("any.7z", &out).await.unwrap();
    let table: BTreeMap<_, _> = renames
        .iter()
        .map(|d| (d.original_name.as_str(), d.final_name.as_str()))
        .collect();
    assert_eq!(table.get("CON.txt"), Some(&"CON_file.txt"));
    assert_eq!(table.get("a:b"), Some(&"a_b_1"));
    assert_eq!(table.get("a:b/x.txt"), Some(&"a_b_1/x.txt"));

    assert_eq!(fs::read_to_string(out.join("CON_file.txt")).unwrap(), "c");
    assert_eq!(fs::read_to_string(out.join("a_b/x.txt")).unwrap(), "ab");
    assert_eq!(fs::read_to_string(out.join("a_b_1/x.txt")).unwrap(), "a:b");
    for decision in &renames {
        assert!(out.join(&decision.final_name).exists(), "{decision:?}");
    }
    assert!(!out.join("a:b").exists());

    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".arcwrap-staging-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
