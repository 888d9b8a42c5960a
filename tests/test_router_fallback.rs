//! Provider router behavior across a multi-provider chain

use std::sync::Arc;

use specsmith::{GenerateOptions, InMemoryRecordStore, LlmError, ProviderRouter};
use specsmith_llm::{ProviderDefaults, ScriptedBackend};
use tokio::sync::mpsc;

fn router(a: Arc<ScriptedBackend>, b: Arc<ScriptedBackend>) -> ProviderRouter {
    ProviderRouter::new("a", vec!["a".to_string(), "b".to_string()])
        .with_provider("a", a, ProviderDefaults::for_model("model-a"))
        .with_provider("b", b, ProviderDefaults::for_model("model-b"))
}

#[tokio::test]
async fn test_falls_back_when_first_provider_fails() {
    let a = Arc::new(ScriptedBackend::failing(
        "a",
        LlmError::ProviderOutage("503".to_string()),
    ));
    let b = Arc::new(ScriptedBackend::new("b").with_default_response("hello from b"));
    let router = router(a.clone(), b.clone());

    let result = router
        .generate("Say hello", &GenerateOptions::for_purpose("greeting"))
        .await
        .unwrap();
    assert_eq!(result.raw_response, "hello from b");
    assert_eq!(result.provider, "b");
    assert_eq!(a.calls("greeting"), 1);

    let usage = router.usage();
    assert_eq!(usage["a"].requests, 0);
    assert_eq!(usage["b"].requests, 1);
    assert!(usage["b"].output_tokens > 0);

    let history = router.drain_history();
    assert_eq!(history.len(), 2);
    assert!(!history[0].success);
    assert_eq!(history[0].provider, "a");
    assert!(history[1].success);
    assert_eq!(history[1].purpose, "greeting");
}

#[tokio::test]
async fn test_exhausted_chain_names_every_provider() {
    let a = Arc::new(ScriptedBackend::failing("a", LlmError::Transport("refused".to_string())));
    let b = Arc::new(ScriptedBackend::failing("b", LlmError::ProviderQuota("429".to_string())));
    let router = router(a, b);

    let err = router
        .generate("Say hello", &GenerateOptions::for_purpose("greeting"))
        .await
        .unwrap_err();
    match err {
        LlmError::FallbackExhausted {
            attempted,
            last_error,
        } => {
            assert_eq!(attempted, vec!["a", "b"]);
            assert!(last_error.contains("429"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(router.usage().values().all(|u| u.requests == 0));
}

#[tokio::test]
async fn test_preferred_provider_goes_first() {
    let a = Arc::new(ScriptedBackend::new("a").with_default_response("from a"));
    let b = Arc::new(ScriptedBackend::new("b").with_default_response("from b"));
    let router = router(a.clone(), b);

    let options = GenerateOptions::for_purpose("greeting").with_provider("b");
    let result = router.generate("hi", &options).await.unwrap();
    assert_eq!(result.provider, "b");
    assert_eq!(a.total_calls(), 0);
    assert_eq!(router.chain_names(Some("b")), vec!["b", "a"]);
}

#[tokio::test]
async fn test_empty_router_reports_no_providers() {
    let router = ProviderRouter::new("a", vec![]);
    let err = router
        .generate("hi", &GenerateOptions::for_purpose("greeting"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::NoProviders));
}

#[tokio::test]
async fn test_streaming_forwards_chunks_of_the_winner() {
    let a = Arc::new(ScriptedBackend::failing("a", LlmError::Transport("down".to_string())));
    let b = Arc::new(
        ScriptedBackend::new("b")
            .with_default_response("streamed answer")
            .with_chunk_size(4),
    );
    let router = router(a, b);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let result = router
        .generate_streaming("hi", &GenerateOptions::for_purpose("greeting"), &tx)
        .await
        .unwrap();
    drop(tx);

    let mut joined = String::new();
    while let Some(chunk) = rx.recv().await {
        joined.push_str(&chunk);
    }
    assert_eq!(joined, result.raw_response);
}

#[tokio::test]
async fn test_history_syncs_to_store() {
    let a = Arc::new(ScriptedBackend::new("a").with_default_response("ok"));
    let b = Arc::new(ScriptedBackend::new("b"));
    let router = router(a, b);
    router
        .generate("one", &GenerateOptions::for_purpose("greeting"))
        .await
        .unwrap();
    router
        .generate("two", &GenerateOptions::for_purpose("greeting"))
        .await
        .unwrap();

    let store = InMemoryRecordStore::new();
    assert_eq!(router.sync_history(&store).await.unwrap(), 2);
    assert_eq!(store.requests().len(), 2);
    assert_eq!(router.sync_history(&store).await.unwrap(), 0);
}
