use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mergeward_clients::MantisClient;
use mergeward_core::{MergewardError, NewTicket, TicketKind, TicketTracker};

async fn setup() -> (MockServer, MantisClient) {
    let server = MockServer::start().await;
    let client = MantisClient::new(&server.uri(), "mantis-token").unwrap();
    (server, client)
}

fn issue(id: u64) -> Value {
    json!({
        "id": id,
        "summary": format!("Ticket {id}"),
        "description": "Checkout fails",
        "notes": [{ "id": 1, "text": "http://git.example.com:7070/team/NS61x/merge_requests/5" }],
        "resolution": { "id": 10, "name": "open" },
        "tags": [{ "id": 7, "name": "Review Awaited" }],
        "custom_fields": [
            { "field": { "id": 1, "name": "Record Type" }, "value": "Bug" }
        ]
    })
}

// ---- Reads ----

#[tokio::test]
async fn fetch_by_id_sends_token_and_maps_issue() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/101"))
        .and(header("Authorization", "mantis-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [issue(101)] })))
        .expect(1)
        .mount(&server)
        .await;

    let ticket = client.fetch_by_id(101).await.unwrap().unwrap();

    assert_eq!(ticket.id, 101);
    assert_eq!(ticket.kind, TicketKind::Regular);
    assert_eq!(ticket.tags, vec![7]);
    assert_eq!(ticket.resolution, "open");
    assert_eq!(ticket.notes.len(), 1);
}

#[tokio::test]
async fn fetch_by_id_of_unknown_ticket_is_none() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.fetch_by_id(404).await.unwrap().is_none());
}

#[tokio::test]
async fn server_error_surfaces_as_tracker_error() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/5"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database offline"))
        .mount(&server)
        .await;

    match client.fetch_by_id(5).await {
        Err(MergewardError::Tracker(msg)) => assert!(msg.contains("database offline")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn filter_pages_until_short_page_and_dedupes() {
    let (server, client) = setup().await;
    let full: Vec<Value> = (1..=50).map(issue).collect();
    Mock::given(method("GET"))
        .and(path("/api/rest/issues"))
        .and(query_param("filter_id", "11"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": full })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues"))
        .and(query_param("filter_id", "11"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [issue(51)] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues"))
        .and(query_param("filter_id", "12"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "issues": [issue(3), issue(60)] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tickets = client.fetch_by_filter(&[11, 12]).await.unwrap();

    assert_eq!(tickets.len(), 52);
    assert_eq!(tickets.last().map(|t| t.id), Some(60));
}

// ---- Mutations ----

#[tokio::test]
async fn mutations_hit_their_endpoints() {
    let (server, client) = setup().await;
    Mock::given(method("PATCH"))
        .and(path("/api/rest/issues/9"))
        .and(body_json(json!({ "resolution": { "name": "Fixed" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/rest/issues/9"))
        .and(body_json(json!({ "status": { "name": "closed" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rest/issues/9/notes"))
        .and(body_json(json!({ "text": "merged" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rest/issues/9/tags"))
        .and(body_json(json!({ "tags": [{ "id": 7 }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/rest/issues/9/tags/7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rest/issues/9/relationships"))
        .and(body_json(json!({
            "issue": { "id": 700 },
            "type": { "name": "related-to" }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client.set_resolution(9, "Fixed").await.unwrap();
    client.close(9).await.unwrap();
    client.add_note(9, "merged").await.unwrap();
    client.add_tags(9, &[7]).await.unwrap();
    client.remove_tags(9, &[7]).await.unwrap();
    client.relate(9, 700).await.unwrap();
}

#[tokio::test]
async fn unrelate_deletes_matching_relationship() {
    let (server, client) = setup().await;
    let mut with_links = issue(9);
    with_links["relationships"] = json!([
        { "id": 31, "issue": { "id": 500 } },
        { "id": 32, "issue": { "id": 600 } }
    ]);
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [with_links] })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/rest/issues/9/relationships/32"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.unrelate(9, 600).await.unwrap();
    // No relationship to 999: nothing to delete.
    client.unrelate(9, 999).await.unwrap();
}

#[tokio::test]
async fn create_ticket_clones_template_and_returns_new_id() {
    let (server, client) = setup().await;
    let mut template = issue(250);
    template["project"] = json!({ "id": 3, "name": "Regression" });
    template["category"] = json!({ "id": 9, "name": "Dining" });
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/250"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [template] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rest/issues/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "issue": { "id": 9001 } })))
        .expect(1)
        .mount(&server)
        .await;

    let id = client
        .create_ticket(&NewTicket {
            template: 250,
            summary: "<b>E5</b> Ticket 250".into(),
            description: "Original Ticket: <b>250</b>".into(),
            record_type: "Code Move".into(),
            target_version: "6.2".into(),
            target_patch: "6.2.1".into(),
            qa_owner: "qa-team".into(),
            er_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        })
        .await
        .unwrap();

    assert_eq!(id, 9001);
    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let body: Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["project"], json!({ "id": 3 }));
    assert_eq!(body["category"], json!({ "name": "Dining" }));
    assert_eq!(body["summary"], json!("<b>E5</b> Ticket 250"));
}

#[test]
fn public_url_points_at_view_page() {
    let client = MantisClient::new("http://tracker.test/", "t").unwrap();
    assert_eq!(client.public_url(42), "http://tracker.test/view.php?id=42");
}
