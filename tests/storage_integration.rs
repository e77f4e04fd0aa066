// Integration tests for the SQLite vector store
use newsrag::config::Config;
use newsrag::storage::{
    database_size, open_vector_store, Database, EmbeddedRecord, RecordMetadata, SqliteVectorStore,
    VectorStore,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn record(vector: Vec<f32>, text: &str, url: &str, position: usize) -> EmbeddedRecord {
    EmbeddedRecord {
        vector,
        text: text.to_string(),
        metadata: RecordMetadata {
            title: format!("Title for {}", url),
            url: url.to_string(),
        },
        position,
    }
}

#[test]
fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("persist.sqlite");

    {
        let store = SqliteVectorStore::open(Database::new(&db_path).unwrap(), 3, "test-model").unwrap();
        store.insert(&record(vec![1.0, 0.0, 0.0], "alpha", "https://n.example/a", 0)).unwrap();
        store.insert(&record(vec![0.0, 1.0, 0.0], "beta", "https://n.example/b", 0)).unwrap();
    }

    let store = SqliteVectorStore::open(Database::new(&db_path).unwrap(), 3, "test-model").unwrap();
    assert_eq!(store.len().unwrap(), 2);

    let hits = store.search(&[0.0, 1.0, 0.0], 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.text, "beta");
    assert_eq!(hits[0].record.metadata.url, "https://n.example/b");
}

#[test]
fn test_reopen_with_other_model_refused() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("model.sqlite");

    drop(SqliteVectorStore::open(Database::new(&db_path).unwrap(), 3, "model-a").unwrap());

    let reopened = SqliteVectorStore::open(Database::new(&db_path).unwrap(), 3, "model-b");
    assert!(reopened.is_err());
}

#[test]
fn test_concurrent_inserts_are_all_visible() {
    let temp = TempDir::new().unwrap();
    let store: Arc<dyn VectorStore> = Arc::new(
        SqliteVectorStore::open(Database::new(&temp.path().join("conc.sqlite")).unwrap(), 4, "m").unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let v = vec![t as f32 + 1.0, i as f32, 1.0, 0.5];
                    store
                        .insert(&record(v, &format!("t{} i{}", t, i), &format!("https://n.example/{}", t), i))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len().unwrap(), 200);

    let hits = store.search(&[1.0, 1.0, 1.0, 1.0], 10).unwrap();
    assert_eq!(hits.len(), 10);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.document_count, 8);
    assert_eq!(stats.duplicate_chunks, 0);
}

#[test]
fn test_open_from_config_and_measure() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();

    assert_eq!(database_size(&config.db_path()).unwrap(), 0);

    let store = open_vector_store(&config).unwrap();
    assert_eq!(store.dimension(), config.embedding.dimension);

    let mut vector = vec![0.0; config.embedding.dimension];
    vector[0] = 1.0;
    store.insert(&record(vector, "sized", "https://n.example/s", 0)).unwrap();

    assert!(config.db_path().exists());
    assert!(database_size(&config.db_path()).unwrap() > 0);

    let stats = store.stats().unwrap();
    assert_eq!(stats.metric, "cosine");
    assert_eq!(stats.embedding_model, config.embedding.model);
}
