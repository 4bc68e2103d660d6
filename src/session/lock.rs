//! Keyed async mutexes. Entries are dropped once nobody holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) async fn lock(&self, key: String) -> KeyGuard<'_> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyGuard {
            locks: &self.locks,
            key,
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

#[derive(Debug)]
pub(crate) struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_released_after_last_guard() {
        let locks = KeyedLocks::default();
        {
            let _a = locks.lock("k".into()).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_key_waits_for_release() {
        let locks = KeyedLocks::default();
        let first = locks.lock("k".into()).await;

        let mut second = tokio_test::task::spawn(locks.lock("k".into()));
        tokio_test::assert_pending!(second.poll());

        drop(first);
        assert!(second.is_woken());
        let _guard = tokio_test::assert_ready!(second.poll());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _a = locks.lock("a".into()).await;
        let _b = locks.lock("b".into()).await;
        assert_eq!(locks.len(), 2);
    }
}
