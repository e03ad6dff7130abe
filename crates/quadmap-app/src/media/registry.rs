use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::source::VideoSource;

/// Stable handle to a registered video source. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaId(u64);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

struct RegistryInner {
    next_id: u64,
    sources: Vec<(MediaId, Arc<VideoSource>)>,
}

/// Arena of live video sources, shared with the decode thread.
///
/// Removing a handle releases its source; a stale handle simply resolves to
/// nothing.
#[derive(Clone)]
pub struct MediaRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for MediaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 1,
                sources: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, source: VideoSource) -> MediaId {
        let mut inner = self.lock();
        let id = MediaId(inner.next_id);
        inner.next_id += 1;
        inner.sources.push((id, Arc::new(source)));
        id
    }

    pub fn get(&self, id: MediaId) -> Option<Arc<VideoSource>> {
        self.lock()
            .sources
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, s)| s.clone())
    }

    pub fn contains(&self, id: MediaId) -> bool {
        self.lock().sources.iter().any(|(sid, _)| *sid == id)
    }

    /// Unregister and release a source. Returns false for unknown handles.
    pub fn remove(&self, id: MediaId) -> bool {
        let removed = {
            let mut inner = self.lock();
            let pos = inner.sources.iter().position(|(sid, _)| *sid == id);
            pos.map(|i| inner.sources.remove(i).1)
        };
        // Release outside the registry lock: it waits for an in-flight decode.
        match removed {
            Some(source) => {
                source.release();
                true
            }
            None => false,
        }
    }

    /// Release and unregister everything.
    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().sources.drain(..).collect();
        for (_, source) in drained {
            source.release();
        }
    }

    /// Consistent view of the current sources for one decode cycle.
    pub fn snapshot(&self) -> Vec<Arc<VideoSource>> {
        self.lock().sources.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::ScriptedDecoder;

    fn video() -> VideoSource {
        VideoSource::new("clip.mp4", Box::new(ScriptedDecoder::new(3)), true)
    }

    #[test]
    fn handles_are_unique_and_resolvable() {
        let reg = MediaRegistry::new();
        let a = reg.insert(video());
        let b = reg.insert(video());
        assert_ne!(a, b);
        assert!(reg.get(a).is_some());
        assert!(reg.contains(b));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_releases_and_invalidates_handle() {
        let reg = MediaRegistry::new();
        let id = reg.insert(video());
        let src = reg.get(id).unwrap();
        assert!(reg.remove(id));
        assert!(src.is_released());
        assert!(reg.get(id).is_none());
        assert!(!reg.remove(id));
    }

    #[test]
    fn handles_are_not_reused_after_removal() {
        let reg = MediaRegistry::new();
        let a = reg.insert(video());
        reg.remove(a);
        let b = reg.insert(video());
        assert_ne!(a, b);
    }

    #[test]
    fn snapshot_survives_concurrent_removal() {
        let reg = MediaRegistry::new();
        let id = reg.insert(video());
        let snap = reg.snapshot();
        reg.remove(id);
        // A released source in an old snapshot is a no-op to advance.
        for src in &snap {
            src.advance();
            assert!(src.current_frame().is_none());
        }
    }

    #[test]
    fn clear_releases_everything() {
        let reg = MediaRegistry::new();
        let a = reg.insert(video());
        let src = reg.get(a).unwrap();
        reg.insert(video());
        reg.clear();
        assert!(reg.is_empty());
        assert!(src.is_released());
    }
}
