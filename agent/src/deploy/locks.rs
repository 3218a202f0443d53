//! Per-target deployment locks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

/// Serialises deployments that share a target directory. Deployments to
/// different targets do not block each other.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `target`
    pub async fn acquire(&self, target: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(target.to_path_buf()).or_default().clone()
        };

        match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(
                    "Waiting for in-flight deployment of {} to finish",
                    target.display()
                );
                lock.lock_owned().await
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_target_is_exclusive() {
        let locks = Arc::new(TargetLocks::new());
        let guard = locks.acquire(Path::new("/srv/app")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/srv/app")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_targets_do_not_block() {
        let locks = TargetLocks::new();
        let _a = locks.acquire(Path::new("/srv/a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Path::new("/srv/b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = TargetLocks::new();
        drop(locks.acquire(Path::new("/srv/a")).await);
        drop(locks.acquire(Path::new("/srv/b")).await);
        // the entry for /srv/a was pruned when /srv/b was acquired
        assert_eq!(locks.tracked(), 1);
    }
}
