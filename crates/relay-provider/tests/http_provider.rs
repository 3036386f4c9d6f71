// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP behaviour of the provider client against a mock server.

use relay_core::{Decoded, Rule, RuleSet};
use relay_provider::{
    AuthError, BearerToken, ProviderEndpoints, RuleSyncError, RuleSynchronizer, StreamError,
    StreamProvider, StreamQuery, TwitterProvider,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RULES: &str = "/2/tweets/search/stream/rules";
const STREAM: &str = "/2/tweets/search/stream";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn provider(server: &MockServer) -> TwitterProvider {
    TwitterProvider::new(ProviderEndpoints {
        token_url: format!("{}/oauth2/token", server.uri()),
        api_url: server.uri(),
        api_key: "key".into(),
        api_secret: "secret".into(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn token() -> BearerToken {
    BearerToken::new("tok")
}

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authenticate_exchanges_client_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", "Basic a2V5OnNlY3JldA=="))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token_type": "bearer", "access_token": "AAAA"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token = provider(&server).authenticate().await.unwrap();
    assert_eq!(token.as_str(), "AAAA");
}

#[tokio::test]
async fn authenticate_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = provider(&server).authenticate().await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 403, .. }));
}

// ---------------------------------------------------------------------------
// Rule store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_passes_dry_run_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RULES))
        .and(query_param("dry_run", "true"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({"add": [{"value": "cats", "tag": "t"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"sent": "now", "summary": {"created": 0, "not_created": 0, "valid": 1, "invalid": 0}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = provider(&server).rule_store(&token());
    let set: RuleSet = [Rule::new("t", "cats")].into_iter().collect();
    let resp = store.add(&set.add_request(), true).await.unwrap();
    assert_eq!(resp.meta.summary.valid, 1);
}

#[tokio::test]
async fn reset_then_add_replaces_stale_rule() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RULES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "111", "value": "dog", "tag": "stale"}],
            "meta": {"sent": "now", "result_count": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RULES))
        .and(body_json(json!({"delete": {"ids": ["111"]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"sent": "now", "summary": {"deleted": 1, "not_deleted": 0}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RULES))
        .and(body_json(json!({"add": [{"value": "cat has:images", "tag": "t1"}]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": [{"id": "222", "value": "cat has:images", "tag": "t1"}],
            "meta": {"sent": "now", "summary": {"created": 1, "not_created": 0, "valid": 1, "invalid": 0}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sync = RuleSynchronizer::new(provider(&server).rule_store(&token()));
    let reset = sync.reset_all().await.unwrap();
    assert_eq!(reset.deleted_ids, vec!["111".to_string()]);

    let desired: RuleSet = [Rule::new("t1", "cat has:images")].into_iter().collect();
    let summary = sync.apply(&desired, false).await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(summary.skipped.is_empty());
}

#[tokio::test]
async fn duplicate_errors_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RULES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"sent": "now", "summary": {"created": 1, "not_created": 1, "valid": 1, "invalid": 1}},
            "errors": [{"value": "cats", "id": "9", "title": "DuplicateRule",
                        "type": "https://api.twitter.com/2/problems/duplicate-rules"}]
        })))
        .mount(&server)
        .await;

    let sync = RuleSynchronizer::new(provider(&server).rule_store(&token()));
    let desired: RuleSet = [Rule::new("a", "cats"), Rule::new("b", "dogs")]
        .into_iter()
        .collect();
    let summary = sync.apply(&desired, false).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.skipped, vec!["cats".to_string()]);
}

#[tokio::test]
async fn server_error_is_remote_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RULES))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sync = RuleSynchronizer::new(provider(&server).rule_store(&token()));
    let err = sync.reset_all().await.unwrap_err();
    assert!(matches!(err, RuleSyncError::RemoteUnavailable { .. }));
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_decodes_lines_and_reports_disconnect() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"data\":{\"id\":\"1\",\"text\":\"one\",\"created_at\":\"2021-11-15T19:08:05.000Z\",\"author_id\":\"7\"},\"matching_rules\":[{\"id\":\"5\",\"tag\":\"t\"}]}\r\n",
        "\r\n",
        "not json\r\n",
        "{\"data\":{\"id\":\"3\",\"text\":\"three\"}}\r\n",
    );
    Mock::given(method("GET"))
        .and(path(STREAM))
        .and(query_param("expansions", "author_id"))
        .and(query_param("tweet.fields", "created_at"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let source = provider(&server).stream_source(&token());
    let mut events = source.start(&StreamQuery::enriched()).await.unwrap();

    let first = events.next().await.unwrap().unwrap();
    let ev = first.event().unwrap();
    assert_eq!(ev.text, "one");
    assert_eq!(ev.author_id.as_deref(), Some("7"));
    assert!(ev.matching_rule_ids.contains("5"));

    assert!(matches!(
        events.next().await.unwrap(),
        Ok(Decoded::Malformed { .. })
    ));
    assert_eq!(
        events.next().await.unwrap().unwrap().event().unwrap().id,
        "3"
    );
    assert_eq!(events.next().await.unwrap(), Err(StreamError::Disconnected));
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn stream_rejected_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM))
        .respond_with(ResponseTemplate::new(429).set_body_string("TooManyConnections"))
        .mount(&server)
        .await;

    let source = provider(&server).stream_source(&token());
    let err = source.start(&StreamQuery::enriched()).await.unwrap_err();
    assert_eq!(
        err,
        StreamError::Rejected {
            status: 429,
            body: "TooManyConnections".into()
        }
    );
}

#[tokio::test]
async fn stream_cannot_be_started_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM))
        .respond_with(ResponseTemplate::new(200).set_body_string("\r\n"))
        .mount(&server)
        .await;

    let source = provider(&server).stream_source(&token());
    let _events = source.start(&StreamQuery::enriched()).await.unwrap();
    let err = source.start(&StreamQuery::enriched()).await.unwrap_err();
    assert_eq!(err, StreamError::AlreadyStarted);
}
