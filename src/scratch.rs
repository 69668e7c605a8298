use std::io;
use std::path::{Path, PathBuf};

use crate::archive_index::ArchiveType;

/// Per-host scratch directory. Created at the start of processing a host
/// and recursively deleted on drop regardless of success,
/// which also gives us cancellation safety for free: a cancelled thread
/// unwinding through this still runs `Drop`.
pub struct HostScratch {
    dir: tempfile::TempDir,
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl HostScratch {
    pub fn create(base: &Path, hostname: &str) -> io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("orc2timeline-{}-", sanitize(hostname)))
            .tempdir_in(base)?;
        Ok(HostScratch { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Per-(plugin, archive, sub_archive) subdirectory so concurrent writers
    /// never collide.
    pub fn instance_dir(
        &self,
        spec_name: &str,
        archive: &ArchiveType,
        sub_archive: &str,
    ) -> io::Result<PathBuf> {
        let dir = self.path().join(format!(
            "{}__{}__{}",
            sanitize(spec_name),
            sanitize(&archive.0),
            sanitize(sub_archive)
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Resolves the temp root: `--tmp-dir` if given, else `TMPDIR`, else the
/// platform default.
pub fn resolve_tmp_root(cli_tmp_dir: Option<&Path>) -> PathBuf {
    if let Some(p) = cli_tmp_dir {
        return p.to_path_buf();
    }
    if let Ok(v) = std::env::var("TMPDIR") {
        if !v.is_empty() {
            return PathBuf::from(v);
        }
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_dirs_are_distinct() {
        let base = tempfile::tempdir().unwrap();
        let scratch = HostScratch::create(base.path(), "A.dom").unwrap();
        let a = scratch
            .instance_dir("NTFSInfo", &ArchiveType::new("General"), "__direct__")
            .unwrap();
        let b = scratch
            .instance_dir("NTFSInfo", &ArchiveType::new("Little"), "__direct__")
            .unwrap();
        assert_ne!(a, b);
        assert!(a.exists());
        assert!(b.exists());
    }

    #[test]
    fn scratch_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let path;
        {
            let scratch = HostScratch::create(base.path(), "A.dom").unwrap();
            path = scratch.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
