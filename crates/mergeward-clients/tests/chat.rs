use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mergeward_clients::ChatNotifier;
use mergeward_core::{MergewardError, Notifier};

#[tokio::test]
async fn posts_text_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/release"))
        .and(body_json(json!({ "text": "*Regression Merge Summary*" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = ChatNotifier::new(format!("{}/hooks/release", server.uri())).unwrap();
    notifier.post("*Regression Merge Summary*").await.unwrap();
}

#[tokio::test]
async fn non_success_is_a_notifier_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let notifier = ChatNotifier::new(server.uri()).unwrap();
    match notifier.post("hello").await {
        Err(MergewardError::Notifier(msg)) => assert!(msg.contains("403")),
        other => panic!("unexpected {other:?}"),
    }
}
