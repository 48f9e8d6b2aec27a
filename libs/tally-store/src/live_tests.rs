/// Tests against real backends.
///
/// Note: these require a running MongoDB / Redis. Point them at a server with
/// TALLY_TEST_MONGODB_URI / TALLY_TEST_REDIS_URI (defaults: localhost).

#[cfg(test)]
mod live_backend_tests {
    use crate::config::{Backend, StoreConfig};
    use crate::error::ErrorKind;
    use crate::store::Store;
    use crate::types::{next_cursor, CaseResult, Language, SubmissionId, STATUS_PENDING};
    use std::time::Duration;

    fn config(backend: Backend) -> StoreConfig {
        let (var, default) = match backend {
            Backend::Mongo => ("TALLY_TEST_MONGODB_URI", "mongodb://127.0.0.1:27017/tally_test"),
            Backend::Redis => ("TALLY_TEST_REDIS_URI", "redis://127.0.0.1:6379/15"),
            Backend::Memory => ("", "memory://"),
        };
        let uri = std::env::var(var).unwrap_or_else(|_| default.to_string());
        StoreConfig {
            database: crate::config::database_from_uri(&uri)
                .unwrap_or_else(|| "tally_test".to_string()),
            // fresh namespace per run so pages are deterministic
            collection: format!("live_{}", SubmissionId::generate()),
            uri,
            backend,
            ..StoreConfig::default()
        }
    }

    fn rust() -> Language {
        Language {
            name: "rust".to_string(),
            source_file_name: "main.rs".to_string(),
            compile_cmd: "rustc -O -o main main.rs".to_string(),
            executables: "main".to_string(),
            run_cmd: "./main".to_string(),
        }
    }

    async fn lifecycle(backend: Backend) {
        let store = Store::connect(&config(backend)).await.expect("Failed to connect");
        let ctx = store.context();

        let mut ids = Vec::new();
        for i in 0..12 {
            let s = store
                .add(&ctx, rust(), format!("fn main() {{ println!(\"{}\"); }}\r\n", i))
                .await
                .unwrap();
            assert_eq!(s.status, STATUS_PENDING);
            ids.push(s.id);
        }

        let results = vec![
            CaseResult { time: 2, memory: 900, stdout: "0\n".to_string(), ..Default::default() },
            CaseResult { time: 1, memory: 800, stdout: "0\n".to_string(), ..Default::default() },
        ];
        store
            .update(&ctx, &ids[11].to_hex(), "accepted", results.clone())
            .await
            .unwrap();
        store
            .update(&ctx, &SubmissionId::generate().to_hex(), "accepted", vec![])
            .await
            .unwrap();

        let first = store.query(&ctx, None).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].id, ids[11]);
        assert_eq!(first[0].results, results);
        assert_eq!(first[0].source, "fn main() { println!(\"11\"); }\r\n");

        let cursor = next_cursor(&first).unwrap().to_hex();
        let second = store.query(&ctx, Some(cursor.as_str())).await.unwrap();
        let got: Vec<SubmissionId> = second.iter().map(|s| s.id).collect();
        assert_eq!(got, vec![ids[1], ids[0]]);

        let err = store.query(&ctx, Some("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIdentity);

        store.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB
    async fn test_mongo_lifecycle() {
        lifecycle(Backend::Mongo).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_lifecycle() {
        lifecycle(Backend::Redis).await;
    }

    #[tokio::test]
    #[ignore] // Needs nothing listening on the port
    async fn test_unreachable_mongo_fails_initialization() {
        let config = StoreConfig {
            uri: "mongodb://127.0.0.1:1/tally_test".to_string(),
            connect_timeout: Duration::from_millis(300),
            ..StoreConfig::default()
        };
        let err = Store::connect(&config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InitializationFailure);
    }
}
