//! Process-wide cache of compiled documents.
//!
//! Concurrent requests for the same path block until the first loader
//! finishes, so each file is compiled at most once per generation.

use promake_types::ProFileRef;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

enum Entry {
    InProgress,
    Ready(ProFileRef),
    Failed,
}

#[derive(Default)]
pub struct ProFileCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    cond: Condvar,
}

impl ProFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached document for `path`, invoking `load` to produce it
    /// on a miss. `load` returning `None` caches the failure; later callers
    /// get `None` without re-reading the file.
    pub fn pro_file<F>(&self, path: &Path, load: F) -> Option<ProFileRef>
    where
        F: FnOnce() -> Option<ProFileRef>,
    {
        let mut entries = self.entries.lock().unwrap();
        loop {
            match entries.get(path) {
                Some(Entry::Ready(pro)) => return Some(pro.clone()),
                Some(Entry::Failed) => return None,
                Some(Entry::InProgress) => {
                    entries = self.cond.wait(entries).unwrap();
                }
                None => break,
            }
        }
        entries.insert(path.to_path_buf(), Entry::InProgress);
        drop(entries);

        let result = load();

        let mut entries = self.entries.lock().unwrap();
        match &result {
            Some(pro) => entries.insert(path.to_path_buf(), Entry::Ready(pro.clone())),
            None => entries.insert(path.to_path_buf(), Entry::Failed),
        };
        self.cond.notify_all();
        result
    }

    /// Drop one document, forcing a re-read on next access.
    pub fn discard(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap();
        while matches!(entries.get(path), Some(Entry::InProgress)) {
            entries = self.cond.wait(entries).unwrap();
        }
        entries.remove(path);
    }

    /// Drop every cached document.
    pub fn discard_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        while entries.values().any(|e| matches!(e, Entry::InProgress)) {
            entries = self.cond.wait(entries).unwrap();
        }
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promake_types::ProFile;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dummy(name: &str) -> ProFileRef {
        ProFile::new(PathBuf::from(name), Vec::new(), Arc::from(""), true, false)
    }

    #[test]
    fn loads_once_per_path() {
        let cache = ProFileCache::new();
        let calls = AtomicUsize::new(0);
        let path = Path::new("/x/a.pro");
        for _ in 0..3 {
            let got = cache.pro_file(path, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(dummy("/x/a.pro"))
            });
            assert!(got.is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_cached_until_discard() {
        let cache = ProFileCache::new();
        let path = Path::new("/x/missing.pro");
        assert!(cache.pro_file(path, || None).is_none());
        // Loader must not run again for a cached failure.
        assert!(cache.pro_file(path, || panic!("re-read")).is_none());
        cache.discard(path);
        assert!(cache.pro_file(path, || Some(dummy("/x/missing.pro"))).is_some());
    }
}
