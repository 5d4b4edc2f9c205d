//! Integration tests for the pooled client against a fake Salesforce.

use std::time::Duration;

use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use sfdc_api::{
    ApiError, DeclareOutcome, NotifyForFields, PoolStats, SalesforceClient, SalesforceConfig,
    TopicOptions,
};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/services/data/v37.0/query/";

fn login_body(server: &MockServer) -> String {
    format!(
        "<soapenv:Envelope><soapenv:Body><loginResponse><result>\
         <serverUrl>{}/services/Soap/u/37.0/00Dx0000000</serverUrl>\
         <sessionId>00D!session</sessionId>\
         </result></loginResponse></soapenv:Body></soapenv:Envelope>",
        server.uri()
    )
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/services/Soap/u/37.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_body(server)))
        .mount(server)
        .await;
}

async fn login_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/services/Soap/u/37.0")
        .count()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client(server: &MockServer) -> SalesforceClient {
    init_tracing();
    let config =
        SalesforceConfig::new("smith", "secret", "TOKEN", false).with_login_url(server.uri());
    SalesforceClient::from_config(config).unwrap()
}

fn empty_query() -> serde_json::Value {
    json!({"totalSize": 0, "done": true, "records": []})
}

#[tokio::test]
async fn query_logs_in_lazily_and_reuses_session() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(header("Authorization", "Bearer 00D!session"))
        .and(query_param("q", "SELECT Id FROM Contact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "003000000000001"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(login_count(&server).await, 0);

    for _ in 0..2 {
        let response = client.query("SELECT Id FROM Contact").await.unwrap();
        assert_eq!(response.first(), Some(&json!({"Id": "003000000000001"})));
    }

    assert_eq!(login_count(&server).await, 1);
    assert_eq!(
        client.stats(),
        PoolStats {
            free: 1,
            busy: 0,
            created: 1,
            discarded: 0
        }
    );
}

#[tokio::test]
async fn expired_session_is_replaced_transparently() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!([{"errorCode": "INVALID_SESSION_ID"}])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_query()))
        .mount(&server)
        .await;

    let client = client(&server);
    let response = client.query("SELECT Id FROM Lead").await.unwrap();

    assert_eq!(response.total_size, 0);
    assert_eq!(
        client.stats(),
        PoolStats {
            free: 1,
            busy: 0,
            created: 2,
            discarded: 1
        }
    );
    assert_eq!(login_count(&server).await, 2);
}

#[tokio::test]
async fn error_after_expiry_reaches_caller() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_body_string("[]"))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.delete("Contact", "003000000000001").await.unwrap_err();

    assert!(matches!(err, ApiError::ResourceNotFound { .. }), "{err:?}");
    let stats = client.stats();
    assert_eq!((stats.free, stats.busy, stats.discarded), (1, 0, 1));
}

#[tokio::test]
async fn non_expiry_error_is_not_retried() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("PATCH"))
        .and(path("/services/data/v37.0/sobjects/Contact/003000000000001"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!([{"errorCode": "MALFORMED_ID"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .update("Contact", "003000000000001", json!({"LastName": "Balboa"}))
        .await
        .unwrap_err();

    match err {
        ApiError::MalformedRequest { content, .. } => assert!(content.contains("MALFORMED_ID")),
        other => panic!("expected malformed request, got {other:?}"),
    }
    let stats = client.stats();
    assert_eq!((stats.free, stats.created, stats.discarded), (1, 1, 0));
}

#[tokio::test]
async fn concurrent_calls_grow_pool_to_concurrency() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(empty_query())
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let results = join_all((0..4).map(|_| client.query("SELECT Id FROM Account"))).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(
        client.stats(),
        PoolStats {
            free: 4,
            busy: 0,
            created: 4,
            discarded: 0
        }
    );

    client.query("SELECT Id FROM Account").await.unwrap();
    assert_eq!(client.stats().created, 4);
}

#[tokio::test]
async fn create_posts_record() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/services/data/v37.0/sobjects/Contact/"))
        .and(body_json(json!({"LastName": "Balboa"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "003000000000002",
            "success": true,
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let created = client
        .create("Contact", json!({"LastName": "Balboa"}))
        .await
        .unwrap();
    assert_eq!(created["id"], "003000000000002");
}

#[tokio::test]
async fn declare_creates_missing_topic() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param(
            "q",
            "SELECT Id, Name, Query FROM PushTopic WHERE Name = 'egg'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_query()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/data/v37.0/sobjects/PushTopic/"))
        .and(body_json(json!({
            "Name": "egg",
            "Query": "SELECT Id, Name FROM Contact",
            "ApiVersion": "37.0",
            "NotifyForFields": "Select",
            "NotifyForOperationCreate": true,
            "NotifyForOperationUpdate": true,
            "NotifyForOperationDelete": true,
            "NotifyForOperationUndelete": false,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "0IF000000000001",
            "success": true,
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let outcome = client
        .topics()
        .declare_push_topic(
            "egg",
            "SELECT Id, Name FROM Contact",
            TopicOptions::default()
                .with_notify_for_fields(NotifyForFields::Select)
                .with_undelete(false),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DeclareOutcome::Created {
            id: Some("0IF000000000001".into())
        }
    );
}

#[tokio::test]
async fn declare_updates_existing_topic_by_id() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param(
            "q",
            "SELECT Id, Name, Query FROM PushTopic WHERE Name = 'egg'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "0IF00000000000A", "Name": "egg", "Query": "SELECT Id FROM Lead"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/services/data/v37.0/sobjects/PushTopic/0IF00000000000A"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/data/v37.0/sobjects/PushTopic/"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let topics = client.topics();
    for _ in 0..2 {
        let outcome = topics
            .declare_push_topic("egg", "SELECT Id FROM Contact", TopicOptions::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeclareOutcome::Updated {
                id: "0IF00000000000A".into()
            }
        );
    }
}

#[tokio::test]
async fn declare_for_sobject_resolves_record_type_and_user() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param(
            "q",
            "SELECT Id, DeveloperName, SobjectType FROM RecordType \
             WHERE SobjectType = 'Contact' AND DeveloperName = 'Partner'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "records": [{"Id": "012000000000001", "DeveloperName": "Partner", "SobjectType": "Contact"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param("q", "SELECT Id FROM User WHERE Username = 'smith'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "records": [{"Id": "005000000000001"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param(
            "q",
            "SELECT Id, Name, Query FROM PushTopic WHERE Name = 'ContactPartner'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_query()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/data/v37.0/sobjects/PushTopic/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "0IF000000000002"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client
        .topics()
        .declare_push_topic_for_sobject("Contact", Some("Partner"), true, TopicOptions::default())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path().ends_with("/PushTopic/"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["Name"], "ContactPartner");
    assert_eq!(
        body["Query"],
        "SELECT Id, Name, LastModifiedById, LastModifiedDate FROM Contact \
         WHERE RecordTypeId = '012000000000001' AND LastModifiedById != '005000000000001'"
    );
}

#[tokio::test]
async fn unknown_user_is_not_found_and_not_cached() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param("q", "SELECT Id FROM User WHERE Username = 'ghost'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_query()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let topics = client.topics();
    for _ in 0..2 {
        let err = topics.get_user_id_by_name("ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "User 'ghost' does not exist");
    }
}
