mod common;

use std::time::Duration;

use common::{MockBehaviour, MockCortex};
use mindpath::config_mod::CortexConfig;
use mindpath::cortex::{
    run_command_block, BlockParams, ConnectOptions, CortexClient, CortexError, CortexSession, Credentials, SessionState,
};
use serde_json::json;

fn credentials() -> Credentials {
    Credentials { client_id: "client".to_string(), client_secret: "secret".to_string(), license: None, debit: 1 }
}

fn options(timeout_ms: u64) -> ConnectOptions {
    ConnectOptions { accept_invalid_certs: true, request_timeout: Duration::from_millis(timeout_ms) }
}

async fn authorized_session(mock: &MockCortex) -> CortexSession {
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();
    let mut session = CortexSession::new(client, credentials());
    session.authorize().await.unwrap();
    session.query_headsets().await.unwrap();
    session
}

#[tokio::test]
async fn test_responses_routed_by_id_out_of_order() {
    let mut behaviour = MockBehaviour::default();
    behaviour.delays.insert("queryHeadsets".to_string(), Duration::from_millis(150));
    let mock = MockCortex::start(behaviour).await;

    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();
    let (headsets, auth) = tokio::join!(
        client.call("queryHeadsets", json!({})),
        client.call("authorize", json!({ "clientId": "c", "clientSecret": "s", "debit": 1 })),
    );

    assert_eq!(headsets.unwrap()[0]["id"], "INSIGHT-1234");
    assert_eq!(auth.unwrap()["cortexToken"], "mock-token");
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_request_ids_increment() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();

    client.call("queryHeadsets", json!({})).await.unwrap();
    client.call("queryHeadsets", json!({})).await.unwrap();

    let requests = mock.requests.lock().await.clone();
    assert_eq!(requests[0]["id"], 0);
    assert_eq!(requests[1]["id"], 1);
    assert_eq!(requests[0]["jsonrpc"], "2.0");
}

#[tokio::test]
async fn test_call_times_out_and_is_forgotten() {
    let behaviour = MockBehaviour { silent: vec!["queryHeadsets".to_string()], ..Default::default() };
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(100)).await.unwrap();

    let err = client.call("queryHeadsets", json!({})).await.unwrap_err();
    assert!(matches!(err, CortexError::Timeout { ref method, timeout_ms: 100 } if method == "queryHeadsets"));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_rpc_error_is_typed() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();

    let err = client.call("noSuchMethod", json!({})).await.unwrap_err();
    assert!(matches!(err, CortexError::Rpc { code: -32601, .. }));
}

#[tokio::test]
async fn test_session_lifecycle_state_machine() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();
    let mut session = CortexSession::new(client, credentials());
    assert_eq!(session.state(), SessionState::Disconnected);

    // Nothing but authorize works before a token exists.
    assert!(matches!(session.create_session().await, Err(CortexError::InvalidState { .. })));

    session.authorize().await.unwrap();
    assert_eq!(session.state(), SessionState::Authorized);
    assert!(matches!(session.subscribe(&["com"]).await, Err(CortexError::InvalidState { .. })));

    assert_eq!(session.create_session().await.unwrap(), "session-1");
    assert_eq!(session.state(), SessionState::SessionOpen);

    let subs = session.subscribe(&["com"]).await.unwrap();
    assert_eq!(subs[0].cols, vec!["act".to_string(), "pow".to_string()]);
    assert_eq!(session.state(), SessionState::Subscribed);

    session.close_session().await.unwrap();
    assert_eq!(session.state(), SessionState::Authorized);
    assert_eq!(session.session_id(), None);

    let methods = mock.methods().await;
    assert_eq!(
        methods,
        vec!["authorize", "queryHeadsets", "createSession", "subscribe", "unsubscribe", "updateSession"]
    );
    assert_eq!(mock.params_of("createSession").await[0]["status"], "open");
    assert_eq!(mock.params_of("updateSession").await[0]["status"], "close");
    assert_eq!(mock.params_of("authorize").await[0]["debit"], 1);

    session.close(true).await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.client().is_connected());
}

#[tokio::test]
async fn test_missing_headset() {
    let behaviour = MockBehaviour { headsets: json!([]), ..Default::default() };
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();
    let mut session = CortexSession::new(client, credentials());

    session.authorize().await.unwrap();
    assert!(matches!(session.query_headsets().await, Err(CortexError::HeadsetNotFound)));
}

#[tokio::test]
async fn test_load_profile_unloads_first() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let mut session = authorized_session(&mock).await;

    assert_eq!(session.query_profiles().await.unwrap(), vec!["trainer", "guest"]);
    session.load_training_profile("trainer").await.unwrap();

    let setups = mock.params_of("setupProfile").await;
    assert_eq!(setups.len(), 2);
    assert_eq!(setups[0]["status"], "unload");
    assert_eq!(setups[1]["status"], "load");
    assert_eq!(setups[1]["profile"], "trainer");
    assert_eq!(setups[1]["headset"], "INSIGHT-1234");

    assert!(matches!(
        session.load_training_profile("nobody").await,
        Err(CortexError::ProfileNotFound { .. })
    ));
}

#[tokio::test]
async fn test_no_profiles() {
    let behaviour = MockBehaviour { profiles: json!([]), ..Default::default() };
    let mock = MockCortex::start(behaviour).await;
    let mut session = authorized_session(&mock).await;
    assert!(matches!(session.load_training_profile("trainer").await, Err(CortexError::NoProfiles)));
}

#[tokio::test]
async fn test_establish_from_config() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let config = CortexConfig {
        url: mock.url.clone(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        profile: Some("guest".to_string()),
        ..Default::default()
    };

    let session = CortexSession::establish(&config).await.unwrap();
    assert_eq!(session.state(), SessionState::Authorized);
    assert_eq!(session.headset_id(), Some("INSIGHT-1234"));
    assert!(session.request_access().await.unwrap());
}

#[tokio::test]
async fn test_command_block_ends_early_over_threshold() {
    let behaviour = MockBehaviour {
        com_events: vec![
            ("neutral".to_string(), 0.2),
            ("push".to_string(), 0.5),
            ("push".to_string(), 0.6),
            ("left".to_string(), 0.1),
        ],
        ..Default::default()
    };
    let mock = MockCortex::start(behaviour).await;
    let mut session = authorized_session(&mock).await;

    let params = BlockParams { block_id: 7, block_time_ms: 5000, threshold: 1.0 };
    let started = std::time::Instant::now();
    let outcome = run_command_block(&mut session, &params).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(4000));
    assert!(outcome.ended_early);
    let decision = outcome.decision.unwrap();
    assert_eq!(decision.command, "push");
    assert_eq!(decision.count, 2);
    assert!((decision.power - 1.1).abs() < 1e-9);
    assert_eq!(outcome.block_id, 7);

    // Cleanup ran: unsubscribed and closed.
    assert_eq!(session.state(), SessionState::Authorized);
    let methods = mock.methods().await;
    assert!(methods.ends_with(&["unsubscribe".to_string(), "updateSession".to_string()]));
}

#[tokio::test]
async fn test_command_block_times_out_to_highest_power() {
    let behaviour = MockBehaviour {
        com_events: vec![
            ("left".to_string(), 0.4),
            ("right".to_string(), 0.3),
            ("left".to_string(), 0.4),
            ("right".to_string(), 0.3),
            ("right".to_string(), 0.3),
        ],
        ..Default::default()
    };
    let mock = MockCortex::start(behaviour).await;
    let mut session = authorized_session(&mock).await;

    let params = BlockParams { block_id: 1, block_time_ms: 300, threshold: 30.0 };
    let outcome = run_command_block(&mut session, &params).await.unwrap();

    assert!(!outcome.ended_early);
    assert_eq!(outcome.events, 5);
    let decision = outcome.decision.unwrap();
    assert_eq!(decision.command, "right");
    assert_eq!(decision.count, 3);
    assert_eq!(outcome.commands["left"].count, 2);
    assert_eq!(session.state(), SessionState::Authorized);
}

#[tokio::test]
async fn test_command_block_without_events() {
    let mock = MockCortex::start(MockBehaviour::default()).await;
    let mut session = authorized_session(&mock).await;

    let params = BlockParams { block_id: 2, block_time_ms: 100, threshold: 30.0 };
    let outcome = run_command_block(&mut session, &params).await.unwrap();
    assert!(outcome.decision.is_none());
    assert_eq!(outcome.events, 0);
}

#[tokio::test]
async fn test_failed_subscription_rejects_block() {
    let behaviour = MockBehaviour {
        subscribe: json!({
            "success": [],
            "failure": [{ "streamName": "com", "code": -32016, "message": "The stream is unavailable" }]
        }),
        ..Default::default()
    };
    let mock = MockCortex::start(behaviour).await;
    let mut session = authorized_session(&mock).await;

    let err = run_command_block(&mut session, &BlockParams::default()).await.unwrap_err();
    assert!(matches!(err, CortexError::SubscriptionFailed { ref stream, .. } if stream == "com"));
    // The session opened for the block was closed again.
    assert_eq!(session.state(), SessionState::Authorized);
}

#[tokio::test]
async fn test_close_waits_for_outstanding_calls() {
    let mut behaviour = MockBehaviour::default();
    behaviour.delays.insert("queryHeadsets".to_string(), Duration::from_millis(300));
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();

    let (headsets, ()) = tokio::join!(client.call("queryHeadsets", json!({})), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close(false).await;
    });

    assert_eq!(headsets.unwrap()[0]["id"], "INSIGHT-1234");
    assert_eq!(client.pending_count().await, 0);
    assert!(!client.is_connected());
    assert!(matches!(client.call("queryHeadsets", json!({})).await, Err(CortexError::Disconnected)));
}

#[tokio::test]
async fn test_forced_close_does_not_wait() {
    let behaviour = MockBehaviour { silent: vec!["queryHeadsets".to_string()], ..Default::default() };
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(2000)).await.unwrap();

    let started = std::time::Instant::now();
    let (_, ()) = tokio::join!(client.call("queryHeadsets", json!({})), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close(true).await;
        assert!(started.elapsed() < Duration::from_millis(250));
    });
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_failed_cleanup_still_releases_session() {
    let behaviour = MockBehaviour {
        silent: vec!["unsubscribe".to_string()],
        com_events: vec![("push".to_string(), 0.9)],
        ..Default::default()
    };
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(100)).await.unwrap();
    let mut session = CortexSession::new(client, credentials());
    session.authorize().await.unwrap();
    session.query_headsets().await.unwrap();

    let params = BlockParams { block_id: 1, block_time_ms: 200, threshold: 30.0 };
    let first = run_command_block(&mut session, &params).await.unwrap();
    assert_eq!(first.decision.unwrap().command, "push");
    assert_eq!(session.state(), SessionState::Authorized);
    assert_eq!(session.session_id(), None);
    assert!(session.info().streams.is_empty());

    // The next block opens a fresh session instead of failing on stale state.
    let second = run_command_block(&mut session, &BlockParams { block_id: 2, ..params }).await.unwrap();
    assert_eq!(second.block_id, 2);
    assert_eq!(mock.methods().await.iter().filter(|m| *m == "createSession").count(), 2);
}

#[tokio::test]
async fn test_close_session_reports_error_after_reset() {
    let behaviour = MockBehaviour { silent: vec!["updateSession".to_string()], ..Default::default() };
    let mock = MockCortex::start(behaviour).await;
    let client = CortexClient::connect(&mock.url, options(100)).await.unwrap();
    let mut session = CortexSession::new(client, credentials());
    session.authorize().await.unwrap();
    session.create_session().await.unwrap();
    session.subscribe(&["com"]).await.unwrap();

    let err = session.close_session().await.unwrap_err();
    assert!(matches!(err, CortexError::Timeout { ref method, .. } if method == "updateSession"));
    assert_eq!(session.state(), SessionState::Authorized);
    assert_eq!(session.create_session().await.unwrap(), "session-1");
}
