//! Line framing for tool output.
//!
//! The archiving tool redraws its progress indicator with `\r` and runs of
//! backspaces, so plain `\n` splitting would glue dozens of samples into one
//! line. [`LineSplitter`] treats all of them as terminators.

use std::collections::VecDeque;
use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const BACKSPACE: u8 = 0x08;
const READ_CHUNK: usize = 8192;

/// Incremental byte-to-line splitter.
///
/// `\n`, `\r\n` and a lone `\r` each end one line. A run of backspaces ends
/// the pending line only when it is non-empty.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
    after_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw output, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            let after_cr = std::mem::take(&mut self.after_cr);
            match byte {
                b'\n' if after_cr => {}
                b'\n' => lines.push(self.take_line()),
                b'\r' => {
                    lines.push(self.take_line());
                    self.after_cr = true;
                }
                BACKSPACE => {
                    if !self.buf.is_empty() {
                        lines.push(self.take_line());
                    }
                }
                _ => self.buf.push(byte),
            }
        }
        lines
    }

    /// Flush the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        (!self.buf.is_empty()).then(|| self.take_line())
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

/// Bounded ring of the most recent lines written to a stream.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_owned());
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// Lazily consumed sequence of output lines.
///
/// Lines are buffered without bound by the reader task, so a consumer that
/// never polls this stream cannot stall the child process.
#[derive(Debug)]
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<String>,
}

pub(crate) type LineSender = mpsc::UnboundedSender<String>;

impl LineStream {
    pub(crate) fn pair() -> (LineSender, LineStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, LineStream { rx })
    }

    /// A stream that is already finished.
    pub(crate) fn closed() -> Self {
        Self::pair().1
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drain every remaining line.
    pub async fn collect_lines(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.rx.recv().await {
            lines.push(line);
        }
        lines
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

pub(crate) fn deliver(tx: &LineSender, tail: Option<&OutputTail>, line: String) {
    if let Some(tail) = tail {
        tail.push(&line);
    }
    // A dropped receiver only means nobody wants these lines; keep draining.
    let _ = tx.send(line);
}

/// Drain an async pipe into `tx` until EOF.
pub(crate) fn spawn_reader<R>(mut pipe: R, tx: LineSender, tail: Option<OutputTail>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.push(&chunk[..n]) {
                        deliver(&tx, tail.as_ref(), line);
                    }
                }
                Err(err) => {
                    debug!(%err, "output pipe read failed");
                    break;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            deliver(&tx, tail.as_ref(), line);
        }
    })
}

/// Blocking counterpart of [`spawn_reader`], used by synchronous capture.
pub(crate) fn read_all_lines<R: Read>(pipe: Option<R>, tail: Option<&OutputTail>) -> Vec<String> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut splitter = LineSplitter::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut lines = Vec::new();
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => lines.extend(splitter.push(&chunk[..n])),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(%err, "output pipe read failed");
                break;
            }
        }
    }
    lines.extend(splitter.finish());
    if let Some(tail) = tail {
        for line in &lines {
            tail.push(line);
        }
    }
    lines
}
