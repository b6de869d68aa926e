use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use super::{SandboxError, TestHarness};
use crate::artifact::Artifact;

/// Scratch directory holding one artifact and its harness.
///
/// After [`SandboxWorkspace::materialize`] every file and directory is
/// read-only. Dropping the workspace makes the tree writable again and
/// removes it.
#[derive(Debug)]
pub struct SandboxWorkspace {
    dir: TempDir,
}

impl SandboxWorkspace {
    pub fn materialize(artifact: &Artifact, harness: &TestHarness) -> Result<Self, SandboxError> {
        let dir = tempfile::Builder::new()
            .prefix("codegate-")
            .tempdir()
            .map_err(|source| SandboxError::Workspace {
                message: "could not create temporary directory".to_string(),
                source,
            })?;
        let workspace = Self { dir };

        let entrypoint = artifact.language().entrypoint();
        workspace.write(Path::new(entrypoint), artifact.source())?;
        for file in &harness.files {
            let relative = validate_relative(&file.path)?;
            if relative == Path::new(entrypoint) {
                return Err(SandboxError::InvalidHarness(format!(
                    "harness file '{}' would replace the artifact entrypoint",
                    file.path
                )));
            }
            workspace.write(&relative, &file.contents)?;
        }

        seal(workspace.path())?;
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, relative: &Path, contents: &str) -> Result<(), SandboxError> {
        let target = self.path().join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| SandboxError::Workspace {
                message: format!("could not create {}", parent.display()),
                source,
            })?;
        }
        fs::write(&target, contents).map_err(|source| SandboxError::Workspace {
            message: format!("could not write {}", target.display()),
            source,
        })
    }
}

impl Drop for SandboxWorkspace {
    fn drop(&mut self) {
        if let Err(err) = unseal(self.dir.path()) {
            tracing::warn!(
                path = %self.dir.path().display(),
                error = %err,
                "failed to restore sandbox workspace permissions"
            );
        }
        // TempDir removes the tree when the field drops.
    }
}

fn validate_relative(path: &str) -> Result<PathBuf, SandboxError> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(SandboxError::InvalidHarness(format!(
                    "harness path '{path}' must be relative and stay inside the workspace"
                )));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SandboxError::InvalidHarness(format!(
            "harness path '{path}' is empty"
        )));
    }
    Ok(clean)
}

fn entries(root: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            if is_dir {
                pending.push(entry.path());
            }
            found.push((entry.path(), is_dir));
        }
    }
    found.push((root.to_path_buf(), true));
    Ok(found)
}

fn seal(root: &Path) -> Result<(), SandboxError> {
    let apply = || -> std::io::Result<()> {
        for (path, is_dir) in entries(root)? {
            set_mode(&path, is_dir, false)?;
        }
        Ok(())
    };
    apply().map_err(|source| SandboxError::Workspace {
        message: "could not make workspace read-only".to_string(),
        source,
    })
}

fn unseal(root: &Path) -> std::io::Result<()> {
    // Directories first so their entries can be listed and removed.
    set_mode(root, true, true)?;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            set_mode(&entry.path(), is_dir, true)?;
            if is_dir {
                pending.push(entry.path());
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, is_dir: bool, writable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Readable by any uid so an unprivileged container user can load it.
    let mode = match (is_dir, writable) {
        (true, false) => 0o555,
        (true, true) => 0o755,
        (false, false) => 0o444,
        (false, true) => 0o644,
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn set_mode(path: &Path, _is_dir: bool, writable: bool) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(!writable);
    fs::set_permissions(path, permissions)
}
