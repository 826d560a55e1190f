//! Progress extraction from the tool's status output (`-bsp1 -bb1`).
//!
//! Recognized shapes:
//!
//! ```text
//!  23%                      percentage only
//!  23% 4 - dir/file.txt     percentage, files done, action marker, item
//! - dir/file.txt            item line (`-` extract, `+` add, `T` test, `=` skip)
//! Add new data to archive: 3 files, 1234 bytes (2 KiB)
//! Size:       1234
//! ```
//!
//! Anything else is ignored. The shapes vary between tool versions, so an
//! unmatched line is never an error.

use futures_util::{Stream, StreamExt, future};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::data::ProgressEvent;

static PERCENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,3})%(?:\s+(\d+))?(?:\s+[-+=URTDA]\s+(.*?))?\s*$").unwrap()
});

static ITEM_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([-+=T])\s+(.+)$").unwrap());

static TOTAL_BYTES_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"archive:\s.*?(\d+)\s+bytes").unwrap());

static SIZE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Size:\s+(\d+)\s*$").unwrap());

const MAX_PERCENTAGE: f64 = 100.0;

/// Cursor over one operation's status lines.
///
/// Delivered percentages never decrease: a sample lower than the last
/// delivered one is dropped.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    last_percentage: Option<f64>,
    current_item: Option<String>,
    total_bytes: Option<u64>,
    files_processed: Option<u64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentage of the last delivered event.
    pub fn last_percentage(&self) -> Option<f64> {
        self.last_percentage
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Consume one line, returning an event if the line carried progress.
    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(caps) = PERCENT_LINE.captures(line) {
            let percentage = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<f64>().ok())?
                .min(MAX_PERCENTAGE);
            if self.last_percentage.is_some_and(|last| percentage < last) {
                return None;
            }
            if let Some(files) = caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                self.files_processed = Some(files);
            }
            if let Some(item) = caps.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
                self.current_item = Some(item.to_owned());
            }
            return Some(self.emit(percentage));
        }

        if let Some(caps) = ITEM_LINE.captures(line) {
            self.current_item = caps.get(2).map(|m| m.as_str().to_owned());
            return Some(self.emit(self.last_percentage.unwrap_or(0.0)));
        }

        if let Some(total) = TOTAL_BYTES_LINE
            .captures(line)
            .or_else(|| SIZE_LINE.captures(line))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            self.total_bytes = Some(total);
        }
        None
    }

    fn emit(&mut self, percentage: f64) -> ProgressEvent {
        self.last_percentage = Some(percentage);
        ProgressEvent {
            percentage,
            current_item: self.current_item.clone(),
            // Estimated, not reported.
            bytes_processed: self
                .total_bytes
                .map(|total| (total as f64 * percentage / MAX_PERCENTAGE).round() as u64),
            total_bytes: self.total_bytes,
            files_processed: self.files_processed,
        }
    }
}

/// Lazy iterator of progress events over a line source.
#[derive(Debug)]
pub struct ProgressIter<I> {
    lines: I,
    parser: ProgressParser,
}

impl<I, S> Iterator for ProgressIter<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        for line in self.lines.by_ref() {
            if let Some(event) = self.parser.feed(line.as_ref()) {
                return Some(event);
            }
        }
        None
    }
}

pub fn parse_progress<I, S>(lines: I) -> ProgressIter<I::IntoIter>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ProgressIter {
        lines: lines.into_iter(),
        parser: ProgressParser::new(),
    }
}

/// Async counterpart of [`parse_progress`]: events are yielded as soon as
/// the line that carries them arrives.
pub fn progress_stream<St>(lines: St) -> impl Stream<Item = ProgressEvent>
where
    St: Stream,
    St::Item: AsRef<str>,
{
    lines
        .scan(ProgressParser::new(), |parser, line| {
            future::ready(Some(parser.feed(line.as_ref())))
        })
        .filter_map(future::ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percentages<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<f64> {
        parse_progress(lines).map(|e| e.percentage).collect()
    }

    #[test]
    fn bare_percentage() {
        let event = ProgressParser::new().feed("  42%").unwrap();
        assert_eq!(event.percentage, 42.0);
        assert_eq!(event.current_item, None);
        assert_eq!(event.bytes_processed, None);
    }

    #[test]
    fn percentage_with_count_and_item() {
        let event = ProgressParser::new().feed(" 23% 4 - dir/file name.txt").unwrap();
        assert_eq!(event.percentage, 23.0);
        assert_eq!(event.files_processed, Some(4));
        assert_eq!(event.current_item.as_deref(), Some("dir/file name.txt"));
    }

    #[test]
    fn percentage_with_item_only() {
        let event = ProgressParser::new().feed("10% + a.txt").unwrap();
        assert_eq!(event.current_item.as_deref(), Some("a.txt"));
        assert_eq!(event.files_processed, None);
    }

    #[test]
    fn item_lines_carry_last_percentage() {
        let mut parser = ProgressParser::new();
        parser.feed(" 30%");
        let event = parser.feed("- b.txt").unwrap();
        assert_eq!(event.percentage, 30.0);
        assert_eq!(event.current_item.as_deref(), Some("b.txt"));
    }

    #[test]
    fn decreasing_samples_suppressed() {
        assert_eq!(percentages([" 10%", " 50%", " 20%", " 50%", " 70%"]), vec![10.0, 50.0, 50.0, 70.0]);
    }

    #[test]
    fn clamps_above_hundred() {
        assert_eq!(percentages(["150%"]), vec![100.0]);
    }

    #[test]
    fn diagnostics_ignored() {
        let lines = [
            "7-Zip (z) 24.07 (x64)",
            "Scanning the drive:",
            "WARNING: something odd",
            "Everything is Ok",
        ];
        assert!(percentages(lines).is_empty());
    }

    #[test]
    fn total_from_add_summary_derives_bytes() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("Add new data to archive: 3 files, 1000 bytes (1 KiB)").is_none());
        assert_eq!(parser.total_bytes(), Some(1000));
        let event = parser.feed(" 25% 1 + a").unwrap();
        assert_eq!(event.bytes_processed, Some(250));
        assert_eq!(event.total_bytes, Some(1000));
    }

    #[test]
    fn bytes_estimate_needs_a_total() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.feed(" 10%").unwrap().bytes_processed, None);
        parser.feed("Size:       200");
        assert_eq!(parser.feed(" 50%").unwrap().bytes_processed, Some(100));
        assert_eq!(parser.feed("- a.txt").unwrap().bytes_processed, Some(100));
    }

    #[test]
    fn total_from_size_line() {
        let mut parser = ProgressParser::new();
        parser.feed("Size:       2048");
        assert_eq!(parser.total_bytes(), Some(2048));
    }

    #[test]
    fn iterator_is_lazy() {
        let mut pulled = 0;
        let lines = ["1%", "2%", "3%"].into_iter().inspect(|_| pulled += 1);
        let first = parse_progress(lines).next();
        assert_eq!(first.map(|e| e.percentage), Some(1.0));
        assert_eq!(pulled, 1);
    }

    #[tokio::test]
    async fn stream_yields_events() {
        let lines = futures_util::stream::iter(vec!["5%".to_string(), "noise".to_string(), "3%".to_string(), "9%".to_string()]);
        let events: Vec<_> = progress_stream(lines).map(|e| e.percentage).collect().await;
        assert_eq!(events, vec![5.0, 9.0]);
    }
}
