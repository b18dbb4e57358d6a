//! Host-side staging directories bind-mounted into the action container.
//!
//! The container never sees the fixture tree itself: inputs are copied into
//! `in` (mounted read-only) and outputs are read back from `out`.
//!
//! ```text
//! <root>/<run id>/
//!   in/          0755
//!   out/         0777
//!     errors/    0777
//!   failed/      0777  archived mismatching renditions
//!   mock-crt/    0755  CA certificate for mock services
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use actionkit_core::{HarnessError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDirs {
    /// Parent of the run directory, e.g. `build/test-worker/<action>`.
    pub root: PathBuf,
    pub work: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub errors: PathBuf,
    pub failed: PathBuf,
    pub mock_crt: PathBuf,
}

impl StagingDirs {
    pub fn new(root: impl Into<PathBuf>, run_id: &str) -> Self {
        let root = root.into();
        let work = root.join(run_id);
        Self {
            input: work.join("in"),
            output: work.join("out"),
            errors: work.join("out").join("errors"),
            failed: work.join("failed"),
            mock_crt: work.join("mock-crt"),
            work,
            root,
        }
    }

    /// Create every directory with the permissions the container needs.
    pub fn prepare(&self) -> Result<()> {
        create(&self.input, 0o755)?;
        create(&self.output, 0o777)?;
        create(&self.errors, 0o777)?;
        create(&self.failed, 0o777)?;
        create(&self.mock_crt, 0o755)?;
        Ok(())
    }

    /// Copy every file of a fixture into `in`; the source is made world
    /// readable for containers running as a non-root user.
    pub fn stage_fixture(&self, fixture_dir: &Path, source: &Path) -> Result<()> {
        copy_dir(fixture_dir, &self.input)?;
        if let Some(name) = source.file_name() {
            let staged = self.input.join(name);
            if !staged.exists() {
                // the source was resolved from outside the fixture directory
                fs::copy(source, &staged)
                    .map_err(|e| HarnessError::io("failed to stage", source, e))?;
            }
            set_mode(&staged, 0o644)?;
        }
        Ok(())
    }

    /// Copy a single file into `in` and make it readable.
    pub fn stage_file(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| HarnessError::InvalidFixture(format!("not a file: {}", source.display())))?;
        let staged = self.input.join(name);
        fs::copy(source, &staged).map_err(|e| HarnessError::io("failed to stage", source, e))?;
        set_mode(&staged, 0o644)?;
        Ok(staged)
    }

    /// Remove everything inside `in` and `out`, keeping the directories
    /// (and `out/errors`) in place for the next test case.
    pub fn empty(&self) -> Result<()> {
        empty_dir(&self.input)?;
        empty_dir(&self.output)?;
        create(&self.errors, 0o777)
    }

    /// Remove the staging area. `failed` and the parent directories are
    /// only removed when empty.
    pub fn cleanup(&self) -> Result<()> {
        remove_all(&self.input)?;
        remove_all(&self.output)?;
        remove_all(&self.mock_crt)?;
        remove_if_empty(&self.failed)?;
        remove_if_empty(&self.work)?;
        remove_if_empty(&self.root)?;
        if let Some(parent) = self.root.parent() {
            remove_if_empty(parent)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        is_empty_dir(&self.input) && self.output_files().is_empty()
    }

    /// Files directly inside `out`, sorted by name.
    pub fn output_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.output)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }
}

fn create(dir: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| HarnessError::io("failed to create", dir, e))?;
    set_mode(dir, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| HarnessError::io("failed to set permissions on", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Recursive copy that follows symlinks.
fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| HarnessError::io("failed to create", to, e))?;
    let entries = fs::read_dir(from).map_err(|e| HarnessError::io("failed to read", from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HarnessError::io("failed to read", from, e))?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target).map_err(|e| HarnessError::io("failed to stage", &path, e))?;
        }
    }
    Ok(())
}

fn empty_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HarnessError::io("failed to read", dir, e)),
    };
    for entry in entries {
        let path = entry
            .map_err(|e| HarnessError::io("failed to read", dir, e))?
            .path();
        let removed = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| HarnessError::io("failed to remove", &path, e))?;
    }
    Ok(())
}

fn remove_all(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io("failed to remove", dir, e)),
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn remove_if_empty(dir: &Path) -> Result<()> {
    if is_empty_dir(dir) {
        fs::remove_dir(dir).map_err(|e| HarnessError::io("failed to remove", dir, e))?;
    }
    Ok(())
}
