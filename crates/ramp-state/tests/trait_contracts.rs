//! Trait contract tests for ArtifactStore.
//!
//! Every backend must pass the same behavioral checks; each test runs against
//! the in-memory fake and the filesystem store.

use std::sync::Arc;

use proptest::prelude::*;
use ramp_state::fakes::MemoryArtifactStore;
use ramp_state::storage_traits::*;
use ramp_state::{FsArtifactStore, StorageError};

fn backends() -> (tempfile::TempDir, Vec<Arc<dyn ArtifactStore>>) {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsArtifactStore::new(dir.path()).unwrap();
    let stores: Vec<Arc<dyn ArtifactStore>> =
        vec![Arc::new(MemoryArtifactStore::new()), Arc::new(fs_store)];
    (dir, stores)
}

fn key(submission: &str, train_is: &[usize]) -> ArtifactKey {
    ArtifactKey::new(submission, FoldIdentity::from_indices(train_is))
}

#[tokio::test]
async fn model_round_trip() {
    let (_dir, stores) = backends();
    for store in stores {
        let k = key("m1", &[0, 1, 2]);
        store.store_model(&k, b"fitted").await.unwrap();
        assert_eq!(store.load_model(&k).await.unwrap(), b"fitted");
    }
}

#[tokio::test]
async fn load_model_not_found() {
    let (_dir, stores) = backends();
    for store in stores {
        let err = store.load_model(&key("m1", &[9])).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(err.is_miss());
    }
}

#[tokio::test]
async fn store_model_overwrites() {
    let (_dir, stores) = backends();
    for store in stores {
        let k = key("m1", &[0, 1]);
        store.store_model(&k, b"old").await.unwrap();
        store.store_model(&k, b"new").await.unwrap();
        assert_eq!(store.load_model(&k).await.unwrap(), b"new");
    }
}

#[tokio::test]
async fn delete_model_then_miss() {
    let (_dir, stores) = backends();
    for store in stores {
        let k = key("m1", &[0, 1]);
        store.store_model(&k, b"m").await.unwrap();
        store.delete_model(&k).await.unwrap();
        assert!(store.load_model(&k).await.unwrap_err().is_miss());
        // deleting again is a no-op
        store.delete_model(&k).await.unwrap();
    }
}

#[tokio::test]
async fn predictions_are_keyed_by_kind() {
    let (_dir, stores) = backends();
    for store in stores {
        let k = key("m1", &[0, 2, 4]);
        store
            .store_predictions(&k, PredictionKind::FullTrain, b"train")
            .await
            .unwrap();
        store
            .store_predictions(&k, PredictionKind::Test, b"test")
            .await
            .unwrap();
        assert_eq!(
            store
                .load_predictions(&k, PredictionKind::FullTrain)
                .await
                .unwrap(),
            b"train"
        );
        assert_eq!(
            store.load_predictions(&k, PredictionKind::Test).await.unwrap(),
            b"test"
        );
    }
}

#[tokio::test]
async fn times_are_keyed_by_kind() {
    let (_dir, stores) = backends();
    for store in stores {
        let k = key("m1", &[1, 3]);
        store.store_time(&k, TimingKind::Train, 2.5).await.unwrap();
        store.store_time(&k, TimingKind::Test, 0.5).await.unwrap();
        assert_eq!(store.load_time(&k, TimingKind::Train).await.unwrap(), 2.5);
        assert_eq!(store.load_time(&k, TimingKind::Test).await.unwrap(), 0.5);
        assert!(store.load_time(&k, TimingKind::Valid).await.is_err());
    }
}

#[tokio::test]
async fn distinct_keys_do_not_interfere() {
    let (_dir, stores) = backends();
    for store in stores {
        let a = key("m1", &[0, 1]);
        let b = key("m2", &[0, 1]);
        let c = key("m1", &[1, 0]);
        store.store_model(&a, b"a").await.unwrap();
        store.store_model(&b, b"b").await.unwrap();
        store.store_model(&c, b"c").await.unwrap();
        assert_eq!(store.load_model(&a).await.unwrap(), b"a");
        assert_eq!(store.load_model(&b).await.unwrap(), b"b");
        assert_eq!(store.load_model(&c).await.unwrap(), b"c");
    }
}

#[tokio::test]
async fn concurrent_writes_under_distinct_keys() {
    let (_dir, stores) = backends();
    for store in stores {
        let mut tasks = Vec::new();
        for i in 0..16usize {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let k = key("m1", &[i, i + 1]);
                store.store_model(&k, format!("model-{i}").as_bytes()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        for i in 0..16usize {
            let got = store.load_model(&key("m1", &[i, i + 1])).await.unwrap();
            assert_eq!(got, format!("model-{i}").as_bytes());
        }
    }
}

proptest! {
    #[test]
    fn prop_identity_is_pure(indices in proptest::collection::vec(0usize..10_000, 0..200)) {
        prop_assert_eq!(
            FoldIdentity::from_indices(&indices),
            FoldIdentity::from_indices(&indices)
        );
    }

    #[test]
    fn prop_distinct_sequences_distinct_identities(
        a in proptest::collection::vec(0usize..1_000, 0..50),
        b in proptest::collection::vec(0usize..1_000, 0..50),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(FoldIdentity::from_indices(&a), FoldIdentity::from_indices(&b));
    }
}
