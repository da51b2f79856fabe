use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Collapses concurrent calls with the same key into one execution.
///
/// The first caller for a key runs the operation; callers arriving while it is
/// pending wait for its result and receive a clone. Once the operation settles
/// the key is free again, so later calls run afresh.
pub struct InFlight<K, V> {
    pending: Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
}

impl<K, V> Default for InFlight<K, V> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

enum Role<V> {
    Leader(watch::Sender<Option<V>>),
    Follower(watch::Receiver<Option<V>>),
}

/// Removes the leader's entry even if its future is dropped mid-flight.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    owner: &'a InFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.owner.pending().remove(&key);
        }
    }
}

impl<K: Eq + Hash, V> InFlight<K, V> {
    fn pending(&self) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently executing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run<F, Fut>(&self, key: K, op: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let role = {
            let mut pending = self.pending();
            match pending.get(&key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    pending.insert(key.clone(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let mut guard = LeaderGuard {
                    owner: self,
                    key: Some(key),
                };
                let value = op().await;
                if let Some(key) = guard.key.take() {
                    self.pending().remove(&key);
                }
                tx.send_replace(Some(value.clone()));
                value
            }
            Role::Follower(mut rx) => {
                if let Ok(settled) = rx.wait_for(Option::is_some).await {
                    if let Some(value) = settled.as_ref() {
                        return value.clone();
                    }
                }
                // The leader was dropped before settling.
                op().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let inflight: Arc<InFlight<&'static str, u32>> = Arc::new(InFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let call = |inflight: Arc<InFlight<&'static str, u32>>| {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            async move {
                inflight
                    .run("k", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        7
                    })
                    .await
            }
        };

        let first = tokio::spawn(call(Arc::clone(&inflight)));
        while inflight.is_empty() {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn(call(Arc::clone(&inflight)));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        gate.notify_waiters();

        assert_eq!(first.await.unwrap(), 7);
        assert_eq!(second.await.unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn settled_keys_run_again() {
        let inflight: InFlight<u8, usize> = InFlight::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            inflight
                .run(1, || async { runs.fetch_add(1, Ordering::SeqCst) })
                .await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dropped_leader_frees_its_key() {
        let inflight: InFlight<u8, u8> = InFlight::new();
        let pending = inflight.run(1, || std::future::pending::<u8>());
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(5), pending).await;
        assert!(timed_out.is_err());
        assert!(inflight.is_empty());
        assert_eq!(inflight.run(1, || async { 3 }).await, 3);
    }
}
