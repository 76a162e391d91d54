//! Test helper functions and utilities.

use oxide_core::ChangeId;
use oxide_db::MemoryDatabase;

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(
    timeout: std::time::Duration,
    interval: std::time::Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: std::time::Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}

/// Revisions of every stored change, oldest first.
pub fn change_revisions(db: &MemoryDatabase) -> Vec<String> {
    db.all_changes().into_iter().map(|c| c.revision).collect()
}

/// Change ids attached to each stored buildset's source stamp, oldest
/// buildset first.
pub async fn buildset_changeids(db: &MemoryDatabase) -> Vec<Vec<ChangeId>> {
    let mut result = Vec::new();
    for buildset in db.all_buildsets() {
        let ss = db
            .sourcestamps()
            .get(buildset.sourcestampid)
            .await
            .expect("source stamp lookup failed")
            .expect("buildset without source stamp");
        result.push(ss.changeids);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_immediate() {
        let result = wait_for(
            std::time::Duration::from_secs(1),
            std::time::Duration::from_millis(10),
            || async { true },
        )
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let result = wait_for(
            std::time::Duration::from_millis(100),
            std::time::Duration::from_millis(10),
            || async { false },
        )
        .await;
        assert!(!result);
    }

    #[tokio::test]
    async fn test_buildset_changeids_empty() {
        let db = MemoryDatabase::new();
        assert!(buildset_changeids(&db).await.is_empty());
        assert!(change_revisions(&db).is_empty());
    }
}
