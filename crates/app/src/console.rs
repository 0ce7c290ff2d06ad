//! Line-oriented stand-in for a chat transport.
//!
//! Each stdin line is `<sender>: <text>` or `<sender>: /image <path>`. A
//! literal `\n` inside the text becomes a line break, so multi-line replies
//! can be typed on one line. Replies go to stdout as `<sender> <- <reply>`.
//! `<sender>: /recent` lists that sender's latest expenses in the local ledger.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use struk_chat::{Dispatcher, Inbound};
use struk_ocr::OcrBackend;
use struk_storage::{LedgerEntry, SqliteStore};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq)]
enum ConsoleLine<'a> {
    Text { sender: &'a str, text: String },
    Image { sender: &'a str, path: &'a str },
    Recent { sender: &'a str },
}

const RECENT_SHOWN: usize = 5;
const RECENT_SCANNED: i64 = 200;

fn parse_console_line(line: &str) -> Option<ConsoleLine<'_>> {
    let (sender, rest) = line.split_once(':')?;
    let sender = sender.trim();
    let rest = rest.trim();
    if sender.is_empty() || rest.is_empty() {
        return None;
    }
    if rest == "/recent" {
        return Some(ConsoleLine::Recent { sender });
    }
    if let Some(path) = rest.strip_prefix("/image ") {
        let path = path.trim();
        return (!path.is_empty()).then_some(ConsoleLine::Image { sender, path });
    }
    Some(ConsoleLine::Text { sender, text: rest.replace("\\n", "\n") })
}

async fn load_image(path: &str) -> std::io::Result<Inbound> {
    let bytes = tokio::fs::read(path).await?;
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();
    Ok(Inbound::Image { bytes, ext })
}

fn recent_line(entry: &LedgerEntry) -> String {
    let r = &entry.record;
    format!(
        "{} {} | {} | {} | {}",
        r.date_label(),
        r.time_label(),
        r.merchant,
        r.total,
        r.category
    )
}

async fn recent_for(store: &SqliteStore, sender: &str) -> Result<Vec<String>> {
    let entries = store.recent_expenses(RECENT_SCANNED).await?;
    Ok(entries
        .iter()
        .filter(|e| e.sender == sender)
        .take(RECENT_SHOWN)
        .map(recent_line)
        .collect())
}

pub async fn run<R: OcrBackend + 'static>(
    dispatcher: Arc<Dispatcher<R>>,
    store: Arc<SqliteStore>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("Console transport ready");

    while let Some(line) = lines.next_line().await? {
        let Some(parsed) = parse_console_line(&line) else {
            if !line.trim().is_empty() {
                eprintln!("expected `<sender>: <text>` or `<sender>: /image <path>`");
            }
            continue;
        };

        let (sender, inbound) = match parsed {
            ConsoleLine::Recent { sender } => {
                match recent_for(&store, sender).await {
                    Ok(lines) if lines.is_empty() => println!("{sender} <- (belum ada catatan)"),
                    Ok(lines) => println!("{sender} <- {}", lines.join("\n")),
                    Err(e) => tracing::warn!(sender, error = %e, "Cannot list recent expenses"),
                }
                continue;
            }
            ConsoleLine::Text { sender, text } => (sender, Inbound::Text(text)),
            ConsoleLine::Image { sender, path } => match load_image(path).await {
                Ok(inbound) => (sender, inbound),
                Err(e) => {
                    tracing::warn!(sender, path, error = %e, "Cannot read image");
                    continue;
                }
            },
        };

        match dispatcher.dispatch(sender, inbound).await {
            Ok(Some(reply)) => println!("{sender} <- {reply}"),
            Ok(None) => {}
            Err(e) => tracing::warn!(sender, error = %e, "Message not handled"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lines() {
        assert_eq!(
            parse_console_line("6281: total 5000\\nY"),
            Some(ConsoleLine::Text { sender: "6281", text: "total 5000\nY".into() })
        );
    }

    #[test]
    fn image_lines() {
        assert_eq!(
            parse_console_line("ani: /image ./struk.jpg"),
            Some(ConsoleLine::Image { sender: "ani", path: "./struk.jpg" })
        );
    }

    #[test]
    fn recent_command() {
        assert_eq!(parse_console_line("ani: /recent"), Some(ConsoleLine::Recent { sender: "ani" }));
    }

    #[tokio::test]
    async fn recent_lists_only_that_senders_entries() {
        use chrono::{NaiveDate, NaiveTime};
        use struk_core::{ExpenseRecord, Rupiah, Source};
        use struk_storage::ExpenseLedger;

        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("struk.db")).await.unwrap();
        for (sender, merchant) in [("ani", "Toko Maju"), ("budi", "Alfamart")] {
            let record = ExpenseRecord {
                merchant: merchant.into(),
                total: Rupiah::new(15_000),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
                category: "Shopping".into(),
                payment_method: "Cash".into(),
                ocr_confidence: 0,
                source: Source::Manual,
            };
            store.append(&LedgerEntry::new(sender, record, None)).await.unwrap();
        }

        let lines = recent_for(&store, "ani").await.unwrap();
        assert_eq!(lines, vec!["01/02/2024 09:05 | Toko Maju | Rp 15.000 | Shopping".to_string()]);
        assert!(recent_for(&store, "cici").await.unwrap().is_empty());
    }

    #[test]
    fn malformed_lines() {
        assert_eq!(parse_console_line("no separator"), None);
        assert_eq!(parse_console_line(": hi"), None);
        assert_eq!(parse_console_line("ani:   "), None);
    }

    #[tokio::test]
    async fn image_extension_is_lowercased() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("STRUK.JPG");
        std::fs::write(&path, b"data").unwrap();
        match load_image(path.to_str().unwrap()).await.unwrap() {
            Inbound::Image { bytes, ext } => {
                assert_eq!(bytes, b"data");
                assert_eq!(ext, "jpg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
