use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arcwrap_archive::ProgressEvent;

/// Callback receiving progress samples of one operation.
///
/// May be called from any worker task; implementations must not assume a
/// fixed thread.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Emit `NN%` samples and per-item lines on stdout.
const PROGRESS_SWITCHES: [&str; 2] = ["-bsp1", "-bb1"];

/// One logical unit of work for the archiving tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create { archive: PathBuf, sources: Vec<PathBuf> },
    Extract { archive: PathBuf, destination: PathBuf },
    Test { archive: PathBuf },
    List { archive: PathBuf },
    /// Verbatim argument vector; stdout is read as progress output.
    Raw { args: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Extract,
    Test,
    List,
    Raw,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Extract => "extract",
            Self::Test => "test",
            Self::List => "list",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn create(archive: impl Into<PathBuf>, sources: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self::Create {
            archive: archive.into(),
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn extract(archive: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Extract {
            archive: archive.into(),
            destination: destination.into(),
        }
    }

    pub fn test(archive: impl Into<PathBuf>) -> Self {
        Self::Test { archive: archive.into() }
    }

    pub fn list(archive: impl Into<PathBuf>) -> Self {
        Self::List { archive: archive.into() }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Extract { .. } => OperationKind::Extract,
            Self::Test { .. } => OperationKind::Test,
            Self::List { .. } => OperationKind::List,
            Self::Raw { .. } => OperationKind::Raw,
        }
    }

    /// Argument vector for the tool. `overwrite` adds `-y` to create and
    /// extract.
    pub fn to_args(&self, overwrite: bool) -> Vec<String> {
        match self {
            Self::Create { archive, sources } => {
                let mut args = vec!["a".to_owned(), path_arg(archive)];
                args.extend(sources.iter().map(|s| path_arg(s)));
                args.extend(PROGRESS_SWITCHES.map(String::from));
                if overwrite {
                    args.push("-y".to_owned());
                }
                args
            }
            Self::Extract { archive, destination } => extract_args(archive, destination, overwrite),
            Self::Test { archive } => {
                let mut args = vec!["t".to_owned(), path_arg(archive)];
                args.extend(PROGRESS_SWITCHES.map(String::from));
                args
            }
            Self::List { archive } => list_args(archive),
            Self::Raw { args } => args.clone(),
        }
    }
}

pub(crate) fn extract_args(archive: &Path, destination: &Path, overwrite: bool) -> Vec<String> {
    let mut args = vec![
        "x".to_owned(),
        path_arg(archive),
        format!("-o{}", destination.display()),
    ];
    args.extend(PROGRESS_SWITCHES.map(String::from));
    if overwrite {
        args.push("-y".to_owned());
    }
    args
}

pub(crate) fn list_args(archive: &Path) -> Vec<String> {
    vec!["l".to_owned(), "-slt".to_owned(), path_arg(archive)]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// An [`Operation`] plus per-submission options.
///
/// # Examples
///
/// ```
/// use arcwrap::{Operation, OperationRequest};
/// use std::time::Duration;
///
/// let request = OperationRequest::new(Operation::test("backup.7z"))
///     .timeout(Duration::from_secs(30))
///     .on_progress(|event| println!("{:.0}%", event.percentage));
/// ```
#[derive(Clone)]
pub struct OperationRequest {
    pub operation: Operation,

    /// Overrides the coordinator's default timeout. Measured from the moment
    /// the operation starts running, across every invocation it makes.
    pub timeout: Option<Duration>,

    pub on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("operation", &self.operation)
            .field("timeout", &self.timeout)
            .field("on_progress", &"{ ... }")
            .finish()
    }
}

impl OperationRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            timeout: None,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl From<Operation> for OperationRequest {
    fn from(operation: Operation) -> Self {
        Self::new(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_args_with_output_dir() {
        let args = Operation::extract("in.7z", "/tmp/out dir").to_args(true);
        assert_eq!(args, ["x", "in.7z", "-o/tmp/out dir", "-bsp1", "-bb1", "-y"]);
    }

    #[test]
    fn create_args_list_sources() {
        let args = Operation::create("out.7z", ["a.txt", "dir"]).to_args(false);
        assert_eq!(args, ["a", "out.7z", "a.txt", "dir", "-bsp1", "-bb1"]);
    }

    #[test]
    fn list_and_test_args() {
        assert_eq!(Operation::list("in.zip").to_args(true), ["l", "-slt", "in.zip"]);
        assert_eq!(Operation::test("in.zip").to_args(true), ["t", "in.zip", "-bsp1", "-bb1"]);
    }

    #[test]
    fn raw_args_verbatim() {
        let op = Operation::Raw {
            args: vec!["i".into()],
        };
        assert_eq!(op.to_args(true), ["i"]);
        assert_eq!(op.kind(), OperationKind::Raw);
    }

    #[test]
    fn request_builder() {
        let request = OperationRequest::new(Operation::test("a.7z")).timeout(Duration::from_secs(1));
        assert_eq!(request.timeout, Some(Duration::from_secs(1)));
        assert!(request.on_progress.is_none());
        assert!(format!("{request:?}").contains("Test"));
    }
}
