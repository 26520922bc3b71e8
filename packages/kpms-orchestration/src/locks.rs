use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Per-directory write locks
///
/// Keys of one stage may run concurrently; two keys whose tasks share an
/// output directory must not interleave their config or model writes.
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(lock_key(dir))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock of `dir` (blocking)
    pub fn with_lock<T>(&self, dir: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(dir);
        let _guard = lock.lock();
        f()
    }

    /// Number of directories seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// One key per directory, however it is spelled
///
/// `.` and `..` are resolved lexically, then the deepest existing ancestor
/// is canonicalized (symlinks, relative paths) and the missing tail is
/// appended, so directories not created yet still get a stable key.
fn lock_key(dir: &Path) -> PathBuf {
    let lexical = lexical_normalize(dir);
    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    let resolved = loop {
        let candidate = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        if let Ok(canonical) = std::fs::canonicalize(candidate) {
            break Some(
                missing
                    .iter()
                    .rev()
                    .fold(canonical, |path: PathBuf, name| path.join(name)),
            );
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break None,
        }
    };
    resolved.unwrap_or(lexical)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
