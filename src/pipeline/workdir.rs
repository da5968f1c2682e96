use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_ATTEMPTS: u32 = 16;

fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "{}-{}-{}",
        millis,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Per-job scratch directory. Removed recursively on drop unless kept.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Creates a fresh `job-*` directory under `root`, creating `root` if needed.
    pub fn create(root: &Path, keep: bool) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let mut last_err = None;
        for _ in 0..MAX_ATTEMPTS {
            let path = root.join(format!("job-{}", unique_suffix()));
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path, keep }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other("could not create work directory")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            log::info!(target: "sniplette::pipeline", "Keeping work dir {}", self.path.display());
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    target: "sniplette::pipeline",
                    "Failed to remove work dir {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop_with_contents() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = {
            let dir = WorkDir::create(&root.path().join("nested"), false).expect("create");
            fs::write(dir.path().join("a.webm"), b"x").expect("write");
            assert!(dir.path().is_dir());
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(root.path().join("nested").is_dir());
    }

    #[test]
    fn kept_when_requested() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = {
            let dir = WorkDir::create(root.path(), true).expect("create");
            dir.path().to_path_buf()
        };
        assert!(path.is_dir());
    }

    #[test]
    fn directories_are_unique() {
        let root = tempfile::tempdir().expect("tempdir");
        let a = WorkDir::create(root.path(), false).expect("a");
        let b = WorkDir::create(root.path(), false).expect("b");
        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("job-"));
    }
}
