use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mergeward_clients::SheetsClient;
use mergeward_core::{SheetConfig, SheetRow, SheetSync, StatusColumns};

const KEY: &str = "sheet-key-1";

fn config(code_move_worksheet: Option<&str>) -> SheetConfig {
    SheetConfig {
        sheet_key: KEY.into(),
        worksheet: "Status".into(),
        code_move_worksheet: code_move_worksheet.map(str::to_string),
        dev_status_done: "Done".into(),
    }
}

async fn setup(code_move_worksheet: Option<&str>) -> (MockServer, SheetsClient) {
    let server = MockServer::start().await;
    let client = SheetsClient::new("sheets-token", config(code_move_worksheet))
        .unwrap()
        .with_api_base(server.uri());
    (server, client)
}

async fn mount_header(server: &MockServer, worksheet: &str, cells: Value) {
    Mock::given(method("GET"))
        .and(path_regex(format!("^/v4/spreadsheets/{KEY}/values/.*{worksheet}.*!1:1$")))
        .and(header("Authorization", "Bearer sheets-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "values": [cells] })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_tickets(server: &MockServer, worksheet: &str, cells: Value) {
    Mock::given(method("GET"))
        .and(path_regex(format!("^/v4/spreadsheets/{KEY}/values/.*{worksheet}.*!A2:A$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "values": cells })))
        .mount(server)
        .await;
}

fn batch_path() -> String {
    format!("/v4/spreadsheets/{KEY}/values:batchUpdate")
}

#[tokio::test]
async fn reads_ticket_rows_from_column_a() {
    let (server, client) = setup(None).await;
    mount_tickets(&server, "Status", json!([["#101"], [], ["102"]])).await;

    let rows = client.read_ticket_rows().await.unwrap();

    assert_eq!(
        rows,
        vec![
            SheetRow { row: 2, ticket: "#101".into() },
            SheetRow { row: 3, ticket: String::new() },
            SheetRow { row: 4, ticket: "102".into() },
        ]
    );
}

#[tokio::test]
async fn status_flags_go_out_in_one_batch_and_header_is_cached() {
    let (server, client) = setup(None).await;
    mount_header(
        &server,
        "Status",
        json!(["Ticket", "Owner", "Code Reviewed", "QA VERIFIED", "Ticket Merged"]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_json(json!({
            "valueInputOption": "RAW",
            "data": [
                { "range": "'Status'!C5", "values": [["1"]] },
                { "range": "'Status'!D5", "values": [["0"]] },
                { "range": "'Status'!E5", "values": [["1"]] }
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_json(json!({
            "valueInputOption": "RAW",
            "data": [
                { "range": "'Status'!C6", "values": [["0"]] },
                { "range": "'Status'!D6", "values": [["0"]] },
                { "range": "'Status'!E6", "values": [["0"]] }
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .update_status_columns(
            5,
            StatusColumns {
                reviewed: true,
                qa_verified: false,
                merged: true,
            },
        )
        .await
        .unwrap();
    client
        .update_status_columns(6, StatusColumns::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn cross_reference_writes_formula_and_dev_status() {
    let (server, client) = setup(Some("Code Moves")).await;
    mount_tickets(&server, "Code", json!([["200"], ["#250"]])).await;
    mount_header(&server, "Code", json!(["Ticket", "Dev Status", "Comments"])).await;
    let formula = r#"=HYPERLINK("http://tracker.test/view.php?id=300", "Code move done in ticket MT#300")"#;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_json(json!({
            "valueInputOption": "USER_ENTERED",
            "data": [
                { "range": "'Code Moves'!C3", "values": [[formula]] },
                { "range": "'Code Moves'!B3", "values": [["Done"]] }
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.propagate_cross_reference(250, formula).await.unwrap();
}

#[tokio::test]
async fn annotation_writes_comment_only() {
    let (server, client) = setup(None).await;
    mount_tickets(&server, "Status", json!([["250"]])).await;
    mount_header(&server, "Status", json!(["Ticket", "Dev Status", "Comments"])).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_json(json!({
            "valueInputOption": "USER_ENTERED",
            "data": [{ "range": "'Status'!C2", "values": [["=1"]] }]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.annotate_ticket_row(250, "=1").await.unwrap();
}

#[tokio::test]
async fn missing_row_is_a_sheet_error() {
    let (server, client) = setup(None).await;
    mount_tickets(&server, "Status", json!([["101"]])).await;

    assert!(matches!(
        client.propagate_cross_reference(999, "=1").await,
        Err(mergeward_core::MergewardError::Sheet(_))
    ));
}
