//! Google Sheets client (v4 values API)
//!
//! Column positions are looked up by header text in row 1 and cached per
//! worksheet for the life of the client.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use mergeward_core::collab::{SheetRow, SheetSync, StatusColumns};
use mergeward_core::{SheetConfig, TicketId};
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{check, ClientError, Result};

const SERVICE: &str = "sheets";

/// Public endpoint of the Sheets API.
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

/// Header texts, compared case-insensitively.
pub mod header {
    pub const CODE_REVIEWED: &str = "code reviewed";
    pub const QA_VERIFIED: &str = "qa verified";
    pub const TICKET_MERGED: &str = "ticket merged";
    pub const COMMENTS: &str = "comments";
    pub const DEV_STATUS: &str = "dev status";
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Value input modes of `values:batchUpdate`.
#[derive(Debug, Clone, Copy)]
enum InputOption {
    Raw,
    UserEntered,
}

impl InputOption {
    fn as_str(self) -> &'static str {
        match self {
            InputOption::Raw => "RAW",
            InputOption::UserEntered => "USER_ENTERED",
        }
    }
}

/// Extract the spreadsheet key from a sheet URL. A bare key is returned as is.
pub fn parse_sheet_key(input: &str) -> Option<String> {
    static URL_KEY: OnceLock<Regex> = OnceLock::new();
    static BARE_KEY: OnceLock<Regex> = OnceLock::new();
    let url_key = URL_KEY
        .get_or_init(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("valid regex"));
    let bare_key =
        BARE_KEY.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));

    let input = input.trim();
    if let Some(c) = url_key.captures(input) {
        return Some(c[1].to_string());
    }
    bare_key.is_match(input).then(|| input.to_string())
}

/// A1 column letters for a 1-based column index.
pub fn column_letter(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Quote a worksheet name for use in an A1 range.
fn quoted(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn flag(set: bool) -> &'static str {
    if set {
        "1"
    } else {
        "0"
    }
}

/// Release spreadsheet client
pub struct SheetsClient {
    http: Client,
    api_base: String,
    token: String,
    config: SheetConfig,
    headers: Mutex<HashMap<String, Vec<String>>>,
}

impl SheetsClient {
    pub fn new(token: &str, config: SheetConfig) -> Result<Self> {
        let http = crate::http_builder(crate::REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.to_string(),
            config,
            headers: Mutex::new(HashMap::new()),
        })
    }

    /// Point the client at another API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn code_move_worksheet(&self) -> &str {
        self.config
            .code_move_worksheet
            .as_deref()
            .unwrap_or(&self.config.worksheet)
    }

    fn url(&self, tail: &[&str]) -> Result<Url> {
        let mut url =
            Url::parse(&self.api_base).map_err(|e| ClientError::Setup(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Setup(format!("{} cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.sheet_key.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        let url = self.url(&["values", range])?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let body: ValueRange = check(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::payload(SERVICE, e))?;
        Ok(body.values)
    }

    async fn batch_update(&self, option: InputOption, data: Vec<Value>) -> Result<()> {
        let url = self.url(&["values:batchUpdate"])?;
        let payload = json!({
            "valueInputOption": option.as_str(),
            "data": data,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check(SERVICE, response).await?;
        Ok(())
    }

    async fn header_row(&self, worksheet: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.cached_header(worksheet) {
            return Ok(cached);
        }
        let rows = self.read_range(&format!("{}!1:1", quoted(worksheet))).await?;
        let header: Vec<String> = rows
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(|v| cell_text(v).trim().to_lowercase())
            .collect();
        debug!(worksheet, columns = header.len(), "read sheet header");
        self.headers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(worksheet.to_string(), header.clone());
        Ok(header)
    }

    fn cached_header(&self, worksheet: &str) -> Option<Vec<String>> {
        self.headers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(worksheet)
            .cloned()
    }

    /// 1-based column index of `name` in `worksheet`'s header row.
    async fn column(&self, worksheet: &str, name: &str) -> Result<u32> {
        let header = self.header_row(worksheet).await?;
        header
            .iter()
            .position(|h| h == name)
            .map(|i| i as u32 + 1)
            .ok_or_else(|| {
                ClientError::payload(SERVICE, format!("no '{name}' column in {worksheet}"))
            })
    }

    async fn ticket_rows(&self, worksheet: &str) -> Result<Vec<SheetRow>> {
        let rows = self.read_range(&format!("{}!A2:A", quoted(worksheet))).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, cells)| SheetRow {
                row: i as u32 + 2,
                ticket: cells.first().map(cell_text).unwrap_or_default(),
            })
            .collect())
    }

    async fn row_of(&self, worksheet: &str, ticket: TicketId) -> Result<u32> {
        let wanted = ticket.to_string();
        self.ticket_rows(worksheet)
            .await?
            .into_iter()
            .find(|r| r.ticket.replace('#', "").trim() == wanted)
            .map(|r| r.row)
            .ok_or_else(|| ClientError::NotFound(format!("ticket {ticket} in {worksheet}")))
    }

    fn cell(worksheet: &str, column: u32, row: u32, value: &str) -> Value {
        json!({
            "range": format!("{}!{}{row}", quoted(worksheet), column_letter(column)),
            "values": [[value]],
        })
    }

    async fn write_cross_reference(
        &self,
        original: TicketId,
        formula: &str,
        mark_done: bool,
    ) -> Result<()> {
        let worksheet = self.code_move_worksheet();
        let row = self.row_of(worksheet, original).await?;
        let comments = self.column(worksheet, header::COMMENTS).await?;
        let mut data = vec![Self::cell(worksheet, comments, row, formula)];
        if mark_done {
            let status = self.column(worksheet, header::DEV_STATUS).await?;
            data.push(Self::cell(
                worksheet,
                status,
                row,
                &self.config.dev_status_done,
            ));
        }
        self.batch_update(InputOption::UserEntered, data).await?;
        info!(ticket = original, row, "Updated sheet row for ticket {original}");
        Ok(())
    }

    async fn write_status(&self, row: u32, status: StatusColumns) -> Result<()> {
        let worksheet = self.config.worksheet.as_str();
        let reviewed = self.column(worksheet, header::CODE_REVIEWED).await?;
        let qa = self.column(worksheet, header::QA_VERIFIED).await?;
        let merged = self.column(worksheet, header::TICKET_MERGED).await?;
        let data = vec![
            Self::cell(worksheet, reviewed, row, flag(status.reviewed)),
            Self::cell(worksheet, qa, row, flag(status.qa_verified)),
            Self::cell(worksheet, merged, row, flag(status.merged)),
        ];
        self.batch_update(InputOption::Raw, data).await
    }
}

#[async_trait]
impl SheetSync for SheetsClient {
    async fn propagate_cross_reference(
        &self,
        original: TicketId,
        formula: &str,
    ) -> mergeward_core::Result<()> {
        self.write_cross_reference(original, formula, true)
            .await
            .map_err(ClientError::sheet)
    }

    async fn annotate_ticket_row(
        &self,
        original: TicketId,
        formula: &str,
    ) -> mergeward_core::Result<()> {
        self.write_cross_reference(original, formula, false)
            .await
            .map_err(ClientError::sheet)
    }

    async fn read_ticket_rows(&self) -> mergeward_core::Result<Vec<SheetRow>> {
        self.ticket_rows(&self.config.worksheet)
            .await
            .map_err(ClientError::sheet)
    }

    async fn update_status_columns(
        &self,
        row: u32,
        status: StatusColumns,
    ) -> mergeward_core::Result<()> {
        self.write_status(row, status)
            .await
            .map_err(ClientError::sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(53), "BA");
        assert_eq!(column_letter(0), "");
    }

    #[test]
    fn sheet_key_from_url_or_bare_key() {
        assert_eq!(
            parse_sheet_key("https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0"),
            Some("1AbC-d_9".to_string())
        );
        assert_eq!(parse_sheet_key(" 1AbC-d_9 "), Some("1AbC-d_9".to_string()));
        assert_eq!(parse_sheet_key("https://example.com/other"), None);
    }

    #[test]
    fn worksheet_names_are_quoted() {
        assert_eq!(quoted("Release 6.1"), "'Release 6.1'");
        assert_eq!(quoted("Dev's"), "'Dev''s'");
    }

    #[test]
    fn request_urls_escape_ranges() {
        let config = SheetConfig {
            sheet_key: "key1".into(),
            worksheet: "Release 6.1".into(),
            code_move_worksheet: None,
            dev_status_done: "Done".into(),
        };
        let client = SheetsClient::new("t", config)
            .unwrap()
            .with_api_base("http://sheets.test/");
        let url = client.url(&["values", "'Release 6.1'!A2:A"]).unwrap();
        assert!(url
            .as_str()
            .starts_with("http://sheets.test/v4/spreadsheets/key1/values/"));
        assert!(url.as_str().contains("%20"));
        assert_eq!(client.code_move_worksheet(), "Release 6.1");
    }
}
