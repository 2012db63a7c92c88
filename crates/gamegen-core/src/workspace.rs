//! Per-job workspace layout.
//!
//! Every job owns `<root>/job-<id>`, mounted into its execution units as
//! `/workspace`. Phase units write their artifacts to `/workspace/<phase>`
//! and the playable build to `/workspace/dist`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{JobId, Phase};

/// Mount point of the job workspace inside execution units.
pub const UNIT_WORKSPACE_DIR: &str = "/workspace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("job-{job_id}"))
    }

    pub fn phase_dir(&self, job_id: JobId, phase: Phase) -> PathBuf {
        self.job_dir(job_id).join(phase.key())
    }

    /// Directory holding the deployable build.
    pub fn dist_dir(&self, job_id: JobId) -> PathBuf {
        self.job_dir(job_id).join("dist")
    }
}

/// Recursively copy `src` into `dst`, creating directories as needed.
/// Existing files are overwritten. Returns the number of files copied.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = WorkspaceLayout::new("/data/workspaces");
        let id = JobId::new(17);

        assert_eq!(layout.job_dir(id), PathBuf::from("/data/workspaces/job-17"));
        assert_eq!(
            layout.phase_dir(id, Phase::Phase1),
            PathBuf::from("/data/workspaces/job-17/phase1")
        );
        assert_eq!(layout.dist_dir(id), PathBuf::from("/data/workspaces/job-17/dist"));
    }

    #[test]
    fn test_copy_dir_all_copies_nested_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("assets/img")).unwrap();
        fs::write(src.path().join("design.md"), "# Design").unwrap();
        fs::write(src.path().join("assets/img/a.png"), [1u8, 2, 3]).unwrap();

        let target = dst.path().join("phase1");
        let copied = copy_dir_all(src.path(), &target).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(target.join("design.md")).unwrap(), "# Design");
        assert_eq!(fs::read(target.join("assets/img/a.png")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_copy_dir_all_missing_source_errors() {
        let dst = tempfile::tempdir().unwrap();
        assert!(copy_dir_all(Path::new("/nonexistent/gamegen/src"), dst.path()).is_err());
    }
}
