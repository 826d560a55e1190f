use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::OperationError;

const STAGING_PREFIX: &str = ".arcwrap-staging-";

/// Scratch directory inside the destination that receives a raw extraction
/// before its members are moved to their sanitized names.
///
/// Removed on drop, whether or not [`commit`](Self::commit) ran.
#[derive(Debug)]
pub(crate) struct Staging {
    dir: TempDir,
    destination: PathBuf,
}

impl Staging {
    /// Created under `destination` so the final moves stay on one file system.
    pub(crate) fn create(destination: &Path) -> Result<Self, OperationError> {
        fs::create_dir_all(destination).map_err(|e| OperationError::staging(destination, e))?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(destination)
            .map_err(|e| OperationError::staging(destination, e))?;
        debug!(staging = %dir.path().display(), "created staging directory");
        Ok(Self {
            dir,
            destination: destination.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Move every staged entry to the destination.
    ///
    /// `mapping` is keyed by `/`-separated paths relative to the staging
    /// root; unmapped entries keep their names under their parent's target.
    /// With `overwrite` unset, existing targets are left alone. Returns the
    /// number of files moved.
    pub(crate) fn commit(self, mapping: &BTreeMap<String, String>, overwrite: bool) -> Result<usize, OperationError> {
        let mut moved = 0;
        self.place_dir(self.dir.path(), "", &self.destination, mapping, overwrite, &mut moved)?;
        Ok(moved)
    }

    fn place_dir(
        &self,
        dir: &Path,
        prefix: &str,
        target_dir: &Path,
        mapping: &BTreeMap<String, String>,
        overwrite: bool,
        moved: &mut usize,
    ) -> Result<(), OperationError> {
        let entries = fs::read_dir(dir).map_err(|e| OperationError::staging(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| OperationError::staging(dir, e))?;
            let source = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
            let target = match mapping.get(&relative) {
                Some(mapped) => self.destination.join(mapped),
                None => target_dir.join(&name),
            };
            let file_type = entry.file_type().map_err(|e| OperationError::staging(&source, e))?;

            if file_type.is_dir() {
                let empty = fs::read_dir(&source)
                    .map_err(|e| OperationError::staging(&source, e))?
                    .next()
                    .is_none();
                if empty {
                    fs::create_dir_all(&target).map_err(|e| OperationError::staging(&target, e))?;
                } else {
                    self.place_dir(&source, &relative, &target, mapping, overwrite, moved)?;
                }
                continue;
            }

            if target.exists() && !overwrite {
                warn!(target = %target.display(), "target exists, leaving it in place");
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| OperationError::staging(parent, e))?;
            }
            fs::rename(&source, &target).map_err(|e| OperationError::staging(&target, e))?;
            *moved += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn staged(destination: &Path, files: &[&str]) -> Staging {
        let staging = Staging::create(destination).unwrap();
        for file in files {
            let path = staging.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }
        staging
    }

    #[test]
    fn moves_files_to_mapped_names() {
        let dest = tempdir().unwrap();
        let staging = staged(dest.path(), &["CON.txt", "docs/a b.txt", "docs/keep.txt"]);
        let staging_path = staging.path().to_path_buf();
        let mapping = BTreeMap::from([
            ("CON.txt".to_owned(), "CON_file.txt".to_owned()),
            ("docs/a b.txt".to_owned(), "docs/a_b.txt".to_owned()),
        ]);

        assert_eq!(staging.commit(&mapping, true).unwrap(), 3);
        assert_eq!(fs::read_to_string(dest.path().join("CON_file.txt")).unwrap(), "CON.txt");
        assert!(dest.path().join("docs/a_b.txt").is_file());
        assert!(dest.path().join("docs/keep.txt").is_file());
        assert!(!staging_path.exists());
    }

    #[test]
    fn keeps_existing_targets_without_overwrite() {
        let dest = tempdir().unwrap();
        fs::write(dest.path().join("a.txt"), "old").unwrap();
        let staging = staged(dest.path(), &["a.txt"]);

        assert_eq!(staging.commit(&BTreeMap::new(), false).unwrap(), 0);
        assert_eq!(fs::read_to_string(dest.path().join("a.txt")).unwrap(), "old");
    }

    #[test]
    fn replaces_existing_targets_with_overwrite() {
        let dest = tempdir().unwrap();
        fs::write(dest.path().join("a.txt"), "old").unwrap();
        let staging = staged(dest.path(), &["a.txt"]);

        assert_eq!(staging.commit(&BTreeMap::new(), true).unwrap(), 1);
        assert_eq!(fs::read_to_string(dest.path().join("a.txt")).unwrap(), "a.txt");
    }

    #[test]
    fn recreates_empty_directories() {
        let dest = tempdir().unwrap();
        let staging = Staging::create(dest.path()).unwrap();
        fs::create_dir_all(staging.path().join("empty/nested")).unwrap();
        let mapping = BTreeMap::from([("empty/nested".to_owned(), "empty/nested_".to_owned())]);

        staging.commit(&mapping, true).unwrap();
        assert!(dest.path().join("empty/nested_").is_dir());
    }

    #[test]
    fn unmapped_children_follow_renamed_directory() {
        let dest = tempdir().unwrap();
        let staging = staged(dest.path(), &["a:b/x.txt", "a:b/y.txt"]);
        let mapping = BTreeMap::from([
            ("a:b".to_owned(), "a_b_1".to_owned()),
            ("a:b/x.txt".to_owned(), "a_b_1/x.txt".to_owned()),
        ]);

        assert_eq!(staging.commit(&mapping, true).unwrap(), 2);
        assert!(dest.path().join("a_b_1/x.txt").is_file());
        assert!(dest.path().join("a_b_1/y.txt").is_file());
        assert!(!dest.path().join("a:b").exists());
    }

    #[test]
    fn dropped_staging_is_removed() {
        let dest = tempdir().unwrap();
        let path = staged(dest.path(), &["x"]).path().to_path_buf();
        assert!(!path.exists());
        assert!(dest.path().exists());
    }
}
