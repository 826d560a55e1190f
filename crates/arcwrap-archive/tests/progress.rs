use arcwrap_archive::{ProgressParser, parse_progress, progress_stream};
use futures_util::StreamExt;

/// Status output of an extraction as seen after line splitting.
const EXTRACT_OUTPUT: &[&str] = &[
    "",
    "7-Zip (z) 24.07 (x64) : Copyright (c) 1999-2024 Igor Pavlov : 2024-06-19",
    "",
    "Scanning the drive for archives:",
    "1 file, 5120 bytes (5 KiB)",
    "",
    "Extracting archive: sample.7z",
    "--",
    "Path = sample.7z",
    "Type = 7z",
    "",
    "  0%",
    " 12% 1 - docs/a.txt",
    " 12% 1 - docs/a.txt",
    " 48% 2 - docs/b b.txt",
    " 31% 2 - docs/b b.txt",
    "- docs/c.txt",
    " 97% 3 - docs/c.txt",
    "",
    "Everything is Ok",
    "",
    "Files: 3",
    "Size:       4096",
    "Compressed: 5120",
];

#[test]
fn extraction_output_is_monotonic() {
    let events: Vec<_> = parse_progress(EXTRACT_OUTPUT).collect();
    let percentages: Vec<_> = events.iter().map(|e| e.percentage).collect();
    assert_eq!(percentages, vec![0.0, 12.0, 12.0, 48.0, 48.0, 97.0]);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(events[3].current_item.as_deref(), Some("docs/b b.txt"));
    assert_eq!(events[4].current_item.as_deref(), Some("docs/c.txt"));
    assert_eq!(events[5].files_processed, Some(3));
}

#[test]
fn arbitrary_interleavings_never_decrease() {
    let lines: Vec<String> = [3, 90, 14, 14, 55, 2, 100, 99, 250]
        .iter()
        .map(|p| format!("{p}%"))
        .collect();
    let percentages: Vec<_> = parse_progress(&lines).map(|e| e.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert!(percentages.iter().all(|p| (0.0..=100.0).contains(p)));
    assert_eq!(percentages.last(), Some(&100.0));
}

#[test]
fn add_output_reports_bytes() {
    let mut parser = ProgressParser::new();
    let lines = [
        "Scanning the drive:",
        "1 folder, 2 files, 800 bytes (1 KiB)",
        "",
        "Creating archive: out.7z",
        "",
        "Add new data to archive: 1 folder, 2 files, 800 bytes (1 KiB)",
        "",
        " 50% + a.txt",
    ];
    let events: Vec<_> = lines.iter().filter_map(|l| parser.feed(l)).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].bytes_processed, Some(400));
    assert_eq!(events[0].total_bytes, Some(800));
}

#[tokio::test]
async fn stream_matches_iterator() {
    let lines = futures_util::stream::iter(EXTRACT_OUTPUT.iter().map(|s| s.to_string()));
    let streamed: Vec<_> = progress_stream(lines).collect().await;
    let iterated: Vec<_> = parse_progress(EXTRACT_OUTPUT).collect();
    assert_eq!(streamed, iterated);
}
