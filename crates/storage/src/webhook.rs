use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::store::{ExpenseLedger, LedgerEntry, StoreError};

/// Posts each confirmed expense as one flat JSON row to an HTTP endpoint,
/// e.g. a spreadsheet web app.
pub struct WebhookLedger {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct WebhookRow<'a> {
    tanggal: String,
    jam: String,
    merchant: &'a str,
    total: i64,
    kategori: &'a str,
    metode: &'a str,
    sumber: String,
    pengirim: &'a str,
    id: String,
}

impl<'a> WebhookRow<'a> {
    fn from_entry(entry: &'a LedgerEntry) -> Self {
        let r = &entry.record;
        WebhookRow {
            tanggal: r.date_label(),
            jam: r.time_label(),
            merchant: &r.merchant,
            total: r.total.amount(),
            kategori: &r.category,
            metode: &r.payment_method,
            sumber: r.source.to_string(),
            pengirim: &entry.sender,
            id: entry.id.to_string(),
        }
    }
}

impl WebhookLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }
}

#[async_trait]
impl ExpenseLedger for WebhookLedger {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        debug!(id = %entry.id, url = %self.url, "Posting expense to webhook");
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookRow::from_entry(entry))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use struk_core::{ExpenseRecord, Rupiah, Source};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers a single request with `status` and hands back the raw request.
    async fn serve_once(status: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text[..header_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + body_len
    }

    fn entry() -> LedgerEntry {
        LedgerEntry::new(
            "628123",
            ExpenseRecord {
                merchant: "Toko Maju".into(),
                total: Rupiah::new(15_000),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
                category: "Shopping".into(),
                payment_method: "Cash".into(),
                ocr_confidence: 0,
                source: Source::Manual,
            },
            None,
        )
    }

    #[test]
    fn row_uses_display_formats() {
        let entry = entry();
        let json = serde_json::to_value(WebhookRow::from_entry(&entry)).unwrap();
        assert_eq!(json["tanggal"], "01/02/2024");
        assert_eq!(json["jam"], "09:05");
        assert_eq!(json["total"], 15_000);
        assert_eq!(json["sumber"], "manual");
        assert_eq!(json["pengirim"], "628123");
        assert_eq!(json["id"], entry.id.to_string());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_http_error() {
        let ledger = WebhookLedger::new("http://127.0.0.1:1/hook");
        assert!(matches!(ledger.append(&entry()).await, Err(StoreError::Http(_))));
    }

    #[tokio::test]
    async fn server_error_is_rejected_with_status() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let result = WebhookLedger::new(url).append(&entry()).await;
        assert!(matches!(result, Err(StoreError::Rejected(500))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn accepted_row_is_posted_as_json() {
        let (url, server) = serve_once("200 OK").await;
        WebhookLedger::new(url).append(&entry()).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"merchant\":\"Toko Maju\""));
        assert!(request.contains("\"total\":15000"));
    }
}
