//! End-to-end tests of subscription, dispatch and cursor persistence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use sfdc_api::{ReplayConfig, SalesforceConfig, TopicOptions};
use sfdc_streaming::{
    BayeuxTransport, ChannelSubscription, DispatchOutcome, HandlerError, Notification,
    NotificationSource, ReplayCursorStore, StreamError, StreamResult, StreamingClient,
    SubscribeMessage,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingTransport {
    batches: Mutex<Vec<Vec<SubscribeMessage>>>,
}

impl RecordingTransport {
    fn batches(&self) -> Vec<Vec<SubscribeMessage>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl BayeuxTransport for RecordingTransport {
    fn client_id(&self) -> String {
        "client-1".to_string()
    }

    async fn send_and_handle(&self, messages: Vec<SubscribeMessage>) -> StreamResult<()> {
        self.batches.lock().push(messages);
        Ok(())
    }
}

struct RejectingTransport;

#[async_trait]
impl BayeuxTransport for RejectingTransport {
    fn client_id(&self) -> String {
        "client-2".to_string()
    }

    async fn send_and_handle(&self, _messages: Vec<SubscribeMessage>) -> StreamResult<()> {
        Err(StreamError::Transport("403::Unknown client".into()))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(login_url: &str, replay_uri: Option<String>) -> SalesforceConfig {
    let replay = ReplayConfig {
        enabled: replay_uri.is_some(),
        storage_uri: replay_uri,
        ttl: Duration::from_secs(3600),
    };
    SalesforceConfig::new("smith", "secret", "TOKEN", false)
        .with_login_url(login_url)
        .with_replay(replay)
}

fn sqlite_uri(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("replay.db").display())
}

async fn ignore(_n: Notification) -> Result<(), HandlerError> {
    Ok(())
}

async fn fail_on_four(n: Notification) -> Result<(), HandlerError> {
    if n.replay_id == 4 {
        return Err("downstream unavailable".into());
    }
    Ok(())
}

fn event(replay_id: i64) -> Value {
    json!({
        "event": {"type": "created", "replayId": replay_id},
        "sobject": {"Id": "003D000000QWGhUIAX"}
    })
}

#[tokio::test]
async fn only_channel_with_stored_cursor_resumes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let uri = sqlite_uri(&dir);

    let seed = ReplayCursorStore::open(&config("http://127.0.0.1:1", Some(uri.clone())).replay)
        .unwrap();
    seed.set("/topic/egg", 11).await.unwrap();
    drop(seed);

    let client = StreamingClient::new(
        config("http://127.0.0.1:1", Some(uri)),
        RecordingTransport::default(),
        vec![
            ChannelSubscription::topic("spam", None, TopicOptions::default(), ignore),
            ChannelSubscription::topic("egg", None, TopicOptions::default(), ignore),
            ChannelSubscription::topic("ham", None, TopicOptions::default(), ignore),
        ],
    )
    .unwrap();

    let batch = client.subscribe().await.unwrap();

    assert_eq!(
        batch,
        vec![
            SubscribeMessage::new(1, "client-1", "/topic/spam"),
            SubscribeMessage::new(2, "client-1", "/topic/egg").with_replay(11),
            SubscribeMessage::new(3, "client-1", "/topic/ham"),
        ]
    );
    assert_eq!(client.transport().batches(), vec![batch]);
    assert_eq!(
        serde_json::to_value(&client.transport().batches()[0][1]).unwrap(),
        json!({
            "id": 2,
            "clientId": "client-1",
            "channel": "/meta/subscribe",
            "subscription": "/topic/egg",
            "ext": {"replay": {"/topic/egg": 11}}
        })
    );
}

#[tokio::test]
async fn failed_event_keeps_cursor_for_resubscribe() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let uri = sqlite_uri(&dir);

    let client = StreamingClient::new(
        config("http://127.0.0.1:1", Some(uri.clone())),
        RecordingTransport::default(),
        vec![ChannelSubscription::sobject("Contact", None, TopicOptions::default(), fail_on_four)
            .declare(false)],
    )
    .unwrap();

    let outcome = client
        .handle_message("/topic/Contact", event(3))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            replay_id: 3,
            cursor_advanced: true
        }
    );

    let outcome = client
        .handle_message("/topic/Contact", event(4))
        .unwrap()
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Failed { replay_id: 4, .. }));

    let batch = client.subscribe().await.unwrap();
    assert_eq!(
        batch,
        vec![SubscribeMessage::new(1, "client-1", "/topic/Contact").with_replay(3)]
    );
    drop(client);

    let reopened = ReplayCursorStore::open(&config("http://127.0.0.1:1", Some(uri)).replay).unwrap();
    assert_eq!(reopened.get("/topic/Contact").await.unwrap(), Some(3));
}

#[tokio::test]
async fn replay_disabled_subscribes_live_and_never_writes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |n: Notification| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push((n.source.clone(), n.client_id.clone(), n.replay_id));
                Ok::<(), HandlerError>(())
            }
        }
    };

    let client = StreamingClient::new(
        config("http://127.0.0.1:1", None),
        RecordingTransport::default(),
        vec![ChannelSubscription::channel("/u/notifications", handler)],
    )
    .unwrap();

    let outcome = client
        .handle_message("/u/notifications", event(7))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            replay_id: 7,
            cursor_advanced: false
        }
    );
    assert_eq!(
        seen.lock().clone(),
        vec![(NotificationSource::Channel, "client-1".to_string(), 7)]
    );

    client.subscribe().await.unwrap();
    let second = client.subscribe().await.unwrap();
    assert_eq!(
        second,
        vec![SubscribeMessage::new(2, "client-1", "/u/notifications")]
    );
}

#[tokio::test]
async fn transport_failure_is_reported() {
    let client = StreamingClient::new(
        config("http://127.0.0.1:1", None),
        RejectingTransport,
        vec![ChannelSubscription::channel("/u/notifications", ignore)],
    )
    .unwrap();

    let err = client.subscribe().await.unwrap_err();
    assert!(matches!(err, StreamError::Transport(_)));
}

#[test]
fn duplicate_channels_are_rejected() {
    let result = StreamingClient::new(
        config("http://127.0.0.1:1", None),
        RecordingTransport::default(),
        vec![
            ChannelSubscription::topic("egg", None, TopicOptions::default(), ignore),
            ChannelSubscription::channel("/topic/egg", ignore),
        ],
    );
    assert!(matches!(result, Err(StreamError::Config(_))));
}

#[test]
fn replay_enabled_without_storage_is_fatal() {
    let mut cfg = config("http://127.0.0.1:1", None);
    cfg.replay.enabled = true;
    let result = StreamingClient::new(cfg, RecordingTransport::default(), Vec::new());
    assert!(matches!(result, Err(StreamError::Config(_))));
}

#[tokio::test]
async fn start_declares_topics_then_subscribes() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/Soap/u/37.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<soapenv:Envelope><soapenv:Body><loginResponse><result>\
             <serverUrl>{}/services/Soap/u/37.0/00Dx0000000</serverUrl>\
             <sessionId>00D!session</sessionId>\
             </result></loginResponse></soapenv:Body></soapenv:Envelope>",
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v37.0/query/"))
        .and(query_param(
            "q",
            "SELECT Id, Name, Query FROM PushTopic WHERE Name = 'egg'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 0,
            "done": true,
            "records": []
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/data/v37.0/sobjects/PushTopic/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "0IF000000000001"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server.uri(), Some("memory://".into()));
    cfg.bayeux_minimum_version = "0.9".into();
    let client = StreamingClient::new(
        cfg,
        RecordingTransport::default(),
        vec![
            ChannelSubscription::topic(
                "egg",
                Some("SELECT Id, Name FROM Contact"),
                TopicOptions::default(),
                ignore,
            ),
            ChannelSubscription::topic("spam", None, TopicOptions::default(), ignore),
        ],
    )
    .unwrap();

    let endpoint = client.login().await.unwrap();
    let host = server.uri().trim_start_matches("http://").to_string();
    assert_eq!(endpoint.server_uri, format!("https://{host}/cometd/37.0"));
    assert_eq!(endpoint.bayeux_version, "1.0");
    assert_eq!(endpoint.bayeux_minimum_version, "0.9");
    assert_eq!(
        client.authorization(),
        Some(("Bearer", "00D!session".to_string()))
    );

    let batch = client.start().await.unwrap();
    assert_eq!(
        batch,
        vec![
            SubscribeMessage::new(1, "client-1", "/topic/egg"),
            SubscribeMessage::new(2, "client-1", "/topic/spam"),
        ]
    );
}
