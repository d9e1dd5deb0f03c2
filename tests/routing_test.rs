//! Tool routing: registration-order resolution, hints, health gating,
//! invocation timeouts, and envelope normalization

mod common;

use common::{FakeFactory, ServerBehavior, endpoint_of, fast_config, stream_descriptor};
use parking_lot::Mutex;
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use toollink::{ToolLinkError, ToolServerManager};

/// Buffers formatted log output so tests can assert on emitted warnings
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn duplicate_tool_name_resolves_to_first_registered_server() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("a"), ServerBehavior::with_tools(&["search"]));
    factory.register(&endpoint_of("b"), ServerBehavior::with_tools(&["search"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();
    manager.connect(&stream_descriptor("b")).await.unwrap();

    let envelope = manager
        .execute_tool("search", Some(json!({"query": "x"})), None, None)
        .await
        .unwrap();

    assert_eq!(envelope.source_server.as_deref(), Some("a"));
    assert_eq!(envelope.text(), "search ran");
}

#[tokio::test]
async fn server_hint_overrides_registration_order() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("alpha"), ServerBehavior::with_tools(&["search"]));
    factory.register(&endpoint_of("beta"), ServerBehavior::with_tools(&["search"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("alpha")).await.unwrap();
    manager.connect(&stream_descriptor("beta")).await.unwrap();

    let envelope = manager
        .execute_tool("search", None, None, Some("bet"))
        .await
        .unwrap();

    assert_eq!(envelope.source_server.as_deref(), Some("beta"));
}

#[tokio::test]
async fn disconnecting_the_owner_moves_resolution_to_the_next_server() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("a"), ServerBehavior::with_tools(&["search"]));
    factory.register(&endpoint_of("b"), ServerBehavior::with_tools(&["search"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();
    manager.connect(&stream_descriptor("b")).await.unwrap();

    manager.disconnect("a").await;

    let envelope = manager.execute_tool("search", None, None, None).await.unwrap();
    assert_eq!(envelope.source_server.as_deref(), Some("b"));
}

#[tokio::test]
async fn unknown_tool_enumerates_every_known_pair() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("a"), ServerBehavior::with_tools(&["translate"]));
    factory.register(&endpoint_of("b"), ServerBehavior::with_tools(&["summarize"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();
    manager.connect(&stream_descriptor("b")).await.unwrap();

    let err = manager
        .execute_tool("search", None, None, None)
        .await
        .unwrap_err();

    match err {
        ToolLinkError::ToolNotFound { name, known } => {
            assert_eq!(name, "search");
            assert_eq!(known, vec!["a:translate", "b:summarize"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unhealthy_owner_is_reported_not_skipped() {
    let factory = FakeFactory::new();
    let sick = ServerBehavior::with_tools(&["search"]);
    factory.register(&endpoint_of("a"), sick.clone());
    factory.register(&endpoint_of("b"), ServerBehavior::with_tools(&["search"]));

    let config = fast_config().with_health_check_interval(Duration::ZERO);
    let manager = ToolServerManager::with_config(config).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();
    manager.connect(&stream_descriptor("b")).await.unwrap();

    sick.fail_lists.store(true, Ordering::SeqCst);

    let err = manager
        .execute_tool("search", None, None, None)
        .await
        .unwrap_err();

    // The owner is health-gated; resolution never falls through to "b"
    match err {
        ToolLinkError::ConnectionUnhealthy { identifier } => assert_eq!(identifier, "a"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn hung_invocation_times_out_and_counts_a_failure() {
    let factory = FakeFactory::new();
    let behavior = ServerBehavior::with_tools(&["search"]);
    factory.register(&endpoint_of("a"), behavior.clone());

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();

    behavior.swallow_calls.store(true, Ordering::SeqCst);

    let err = manager
        .execute_tool("search", None, Some(Duration::from_millis(50)), None)
        .await
        .unwrap_err();

    match err {
        ToolLinkError::ExecutionTimeout {
            identifier, tool, ..
        } => {
            assert_eq!(identifier, "a");
            assert_eq!(tool, "search");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let status = manager.connection_status().await;
    assert_eq!(status[0].consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn failure_streak_warns_at_the_threshold_and_beyond() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(capture.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let factory = FakeFactory::new();
    let behavior = ServerBehavior::with_tools(&["search"]);
    factory.register(&endpoint_of("a"), behavior.clone());

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();

    behavior.swallow_calls.store(true, Ordering::SeqCst);

    for _ in 0..4 {
        manager
            .execute_tool("search", None, Some(Duration::from_millis(10)), None)
            .await
            .unwrap_err();
    }
    assert!(!capture.contents().contains("consecutive invocation failures"));

    // Fifth and sixth failures both warn; the streak keeps counting
    for _ in 0..2 {
        manager
            .execute_tool("search", None, Some(Duration::from_millis(10)), None)
            .await
            .unwrap_err();
    }

    let status = manager.connection_status().await;
    assert_eq!(status[0].consecutive_failures, 6);

    let warned = capture
        .contents()
        .matches("consecutive invocation failures")
        .count();
    assert_eq!(warned, 2);
}

#[tokio::test]
async fn result_is_normalized_with_the_serving_server_attached() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("a"), ServerBehavior::with_tools(&["search"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();

    let envelope = manager.execute_tool("search", None, None, None).await.unwrap();

    assert_eq!(envelope.content_blocks.len(), 1);
    assert!(envelope.error.is_none());
    assert_eq!(envelope.source_server.as_deref(), Some("a"));
}

#[tokio::test]
async fn all_tools_lists_in_registration_order() {
    let factory = FakeFactory::new();
    factory.register(&endpoint_of("a"), ServerBehavior::with_tools(&["translate"]));
    factory.register(&endpoint_of("b"), ServerBehavior::with_tools(&["summarize"]));

    let manager = ToolServerManager::with_config(fast_config()).with_factory(factory);
    manager.connect(&stream_descriptor("a")).await.unwrap();
    manager.connect(&stream_descriptor("b")).await.unwrap();

    let tools = manager.all_tools().await;
    let names: Vec<(&str, &str)> = tools
        .iter()
        .map(|t| (t.source_server.as_str(), t.name.as_str()))
        .collect();

    assert_eq!(names, vec![("a", "translate"), ("b", "summarize")]);
}
