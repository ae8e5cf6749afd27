use std::sync::Arc;

use callstore_api::{CallState, StoreBackend};
use callstore_engine::{
    BackendConfig, BackendRegistry, CallstoreConfig, Scheduler, SchedulerConfig, Store, StoreConfig, StoreError,
};
use callstore_storage_file::{FileBackend, FileBackendConfig};
use callstore_storage_memory::MemoryBackend;

const ROUNDS: usize = 10;

async fn check_acid(store: &Store<CallState>, call: CallState) -> Result<(), StoreError> {
    let phone = call.initiate.phone_number.clone();

    assert!(store.get(&call.call_id).await?.is_none());
    assert_ne!(store.search_one(&phone).await?.as_ref(), Some(&call));
    assert!(!store.search_all(&phone, 1).await?.records.contains(&call));

    store.create(&call).await?;

    assert_eq!(store.get(&call.call_id).await?.as_ref(), Some(&call));
    assert_eq!(store.search_one(&phone).await?.as_ref(), Some(&call));
    assert!(store.search_all(&phone, 1).await?.records.contains(&call));
    Ok(())
}

async fn check_transaction(store: &Store<CallState>, call: CallState, text: String) -> Result<(), StoreError> {
    assert!(store.get(&call.call_id).await?.is_none());
    store.create(&call).await?;

    let first = store
        .transaction::<_, StoreError>(&call.call_id, |c| {
            c.voice_id = Some(text.clone());
            Ok(())
        })
        .await?;
    assert_eq!(first.voice_id.as_deref(), Some(text.as_str()));

    let second = store
        .transaction::<_, StoreError>(&call.call_id, |c| {
            assert_eq!(c.voice_id.as_deref(), Some(text.as_str()));
            c.in_progress = true;
            Ok(())
        })
        .await?;
    assert!(second.in_progress);
    assert_eq!(second.voice_id.as_deref(), Some(text.as_str()));

    let stored = store.get(&call.call_id).await?.expect("call persisted");
    assert_eq!(stored.voice_id.as_deref(), Some(text.as_str()));
    assert!(stored.in_progress);
    Ok(())
}

async fn run_rounds(backend: Arc<dyn StoreBackend>) {
    let outcome = Scheduler::scoped(&SchedulerConfig::default(), |scheduler| async move {
        let store = Arc::new(Store::<CallState>::with_scheduler(
            backend,
            StoreConfig::default(),
            scheduler,
        ));
        let mut tasks = Vec::new();
        for _ in 0..ROUNDS {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let phone = format!("+1555{}", &uuid::Uuid::new_v4().simple().to_string()[..7]);
                check_acid(&store, CallState::new(phone.clone())).await?;
                check_transaction(&store, CallState::new(phone), uuid::Uuid::new_v4().to_string()).await
            }));
        }
        for task in tasks {
            task.await.expect("round panicked")?;
        }
        Ok::<_, StoreError>(())
    })
    .await;
    outcome.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acid_memory() {
    run_rounds(Arc::new(MemoryBackend::default())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acid_file() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(&FileBackendConfig::new(dir.path().to_string_lossy()));
    backend.init().await.unwrap();
    run_rounds(Arc::new(backend)).await;
}

#[tokio::test]
async fn test_call_lifecycle_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let toml_str = format!(
        r#"
[store]
max_retries = 5

[backend]
kind = "file"

[backend.config]
data_dir = "{}"
"#,
        dir.path().display()
    );
    let config = CallstoreConfig::parse(&toml_str).unwrap();
    assert_eq!(config.backend.kind, "file");

    let registry = BackendRegistry::with_builtins();
    let store = Store::<CallState>::open(&config, &registry).await.unwrap();

    let call = CallState::with_id("c1", "+15551234567");
    store.create(&call).await.unwrap();
    store
        .transaction::<_, StoreError>("c1", |c| {
            c.voice_id = Some("alloy".into());
            Ok(())
        })
        .await
        .unwrap();
    store.shutdown().await.unwrap();

    // A fresh store on the same directory sees the committed state.
    let reopened = Store::<CallState>::open(&config, &registry).await.unwrap();
    let found = reopened.search_one("+15551234567").await.unwrap().unwrap();
    assert_eq!(found.call_id, "c1");
    assert_eq!(found.voice_id.as_deref(), Some("alloy"));
}

#[tokio::test]
async fn test_unknown_backend_fails_open() {
    let config = CallstoreConfig {
        backend: BackendConfig {
            kind: "nosql".into(),
            config: None,
        },
        ..Default::default()
    };
    let result = Store::<CallState>::open(&config, &BackendRegistry::with_builtins()).await;
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[tokio::test]
async fn test_voice_bot_scenario() {
    let store = Store::<CallState>::new(
        Arc::new(MemoryBackend::default()),
        StoreConfig::default(),
        &SchedulerConfig::default(),
    );
    let call = CallState::with_id("c1", "+15551234567");
    assert!(store.get("c1").await.unwrap().is_none());

    store.create(&call).await.unwrap();
    assert_eq!(store.get("c1").await.unwrap(), Some(call.clone()));

    store
        .transaction::<_, StoreError>("c1", |c| {
            c.voice_id = Some("abc".into());
            Ok(())
        })
        .await
        .unwrap();
    let after_voice = store.get("c1").await.unwrap().unwrap();
    assert_eq!(after_voice.voice_id.as_deref(), Some("abc"));
    assert!(!after_voice.in_progress);

    store
        .transaction::<_, StoreError>("c1", |c| {
            c.in_progress = true;
            Ok(())
        })
        .await
        .unwrap();
    let after_progress = store.get("c1").await.unwrap().unwrap();
    assert_eq!(after_progress.voice_id.as_deref(), Some("abc"));
    assert!(after_progress.in_progress);
    assert_eq!(after_progress.created_at, call.created_at);
}
