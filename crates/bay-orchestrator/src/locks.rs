use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bay_domain::SandboxId;

/// Named per-sandbox locks serializing mutating operations (ensure-running,
/// stop, delete, extend-ttl, touch) within this process.
///
/// Entries are removed when their sandbox is deleted so the table cannot
/// grow without bound. Across instances, mutual exclusion is best-effort;
/// row versions and unique constraints at the store catch the remainder.
#[derive(Default)]
pub struct SandboxLocks {
    inner: Mutex<HashMap<SandboxId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for a sandbox. The returned handle is
    /// locked by the caller; holding the map mutex across an await would
    /// serialize unrelated sandboxes.
    pub fn lock_for(&self, id: &SandboxId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.inner.lock().unwrap();
        guard.entry(id.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
    }

    /// Drop the entry for a deleted sandbox. In-flight holders keep their
    /// Arc; new callers will briefly mint a fresh lock, which is harmless
    /// for a sandbox that no longer accepts work.
    pub fn remove(&self, id: &SandboxId) {
        self.inner.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_sandbox_same_lock() {
        let locks = SandboxLocks::new();
        let a = locks.lock_for(&SandboxId::new("sbx-1"));
        let b = locks.lock_for(&SandboxId::new("sbx-1"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn lock_serializes_critical_sections() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let locks = Arc::new(SandboxLocks::new());
        let inside = Arc::new(AtomicU32::new(0));
        let id = SandboxId::new("sbx-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let lock = locks.lock_for(&id);
                let _guard = lock.lock().await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn remove_prevents_unbounded_growth() {
        let locks = SandboxLocks::new();
        for i in 0..100 {
            locks.lock_for(&SandboxId::new(format!("sbx-{i}")));
        }
        assert_eq!(locks.len(), 100);
        for i in 0..100 {
            locks.remove(&SandboxId::new(format!("sbx-{i}")));
        }
        assert!(locks.is_empty());
    }
}
