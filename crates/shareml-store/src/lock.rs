//! Singleton execution guard: one `(task_type, share_id)` pair may be
//! running at a time, enforced by a self-expiring lock shared across
//! worker processes via `KvStore` (spec.md §4.J).

use shareml_ratelimit::KvStore;
use std::time::Duration;

/// TTL per task type, matching spec.md §4.J exactly. Falls back to the
/// `summarize_llm` TTL for an unrecognized task type.
pub fn lock_ttl(task_type: &str) -> Duration {
    match task_type {
        "transcribe_whisper" => Duration::from_secs(15 * 60),
        "embed_vectors" => Duration::from_secs(10 * 60),
        "batch_embed_vectors" => Duration::from_secs(30 * 60),
        _ => Duration::from_secs(5 * 60),
    }
}

fn lock_key(task_type: &str, share_id: &str) -> String {
    format!("lock:{task_type}:{share_id}")
}

/// Attempts to acquire the singleton lock for `(task_type, share_id)`.
/// `Ok(true)` means the caller owns execution; `Ok(false)` means another
/// holder has it and the caller must not execute.
pub async fn acquire<S: KvStore>(
    store: &S,
    task_type: &str,
    share_id: &str,
) -> Result<bool, shareml_ratelimit::StoreError> {
    store
        .acquire_lock(&lock_key(task_type, share_id), lock_ttl(task_type))
        .await
}

/// Releases the lock on terminal success, terminal failure, or whenever
/// the holder is done early. Safe to call even if the lock already
/// expired.
pub async fn release<S: KvStore>(
    store: &S,
    task_type: &str,
    share_id: &str,
) -> Result<(), shareml_ratelimit::StoreError> {
    store.release_lock(&lock_key(task_type, share_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use shareml_ratelimit::InMemoryStore;

    #[tokio::test]
    async fn second_acquire_is_refused_while_first_holds_the_lock() {
        let store = InMemoryStore::new();
        assert!(acquire(&store, "summarize_llm", "share-1").await.unwrap());
        assert!(!acquire(&store, "summarize_llm", "share-1").await.unwrap());
    }

    #[tokio::test]
    async fn release_allows_reacquisition() {
        let store = InMemoryStore::new();
        assert!(acquire(&store, "embed_vectors", "share-2").await.unwrap());
        release(&store, "embed_vectors", "share-2").await.unwrap();
        assert!(acquire(&store, "embed_vectors", "share-2").await.unwrap());
    }

    #[test]
    fn ttl_matches_per_task_type_budget() {
        assert_eq!(lock_ttl("summarize_llm"), Duration::from_secs(300));
        assert_eq!(lock_ttl("transcribe_whisper"), Duration::from_secs(900));
        assert_eq!(lock_ttl("embed_vectors"), Duration::from_secs(600));
        assert_eq!(lock_ttl("batch_embed_vectors"), Duration::from_secs(1800));
    }
}
