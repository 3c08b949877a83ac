//! Pairs each message of a transaction with its execution log entry.

use crate::ledger::types::{RawEvent, RawLog, RawTransaction};
use std::collections::VecDeque;
use tracing::warn;

/// Execution outcome of one message.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub message_index: usize,
    pub success: bool,
    pub events: Vec<RawEvent>,
    pub error_text: Option<String>,
}

impl LogEntry {
    pub fn event(&self, event_type: &str) -> Option<&RawEvent> {
        self.events.iter().find(|e| e.event_type == event_type)
    }
}

/// Transaction-level outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxStatus {
    pub success: bool,
    pub error_message: Option<String>,
}

/// Log entries queued in message order. Each entry is handed out once.
#[derive(Clone, Debug, Default)]
pub struct CorrelatedLogs {
    entries: VecDeque<LogEntry>,
    status: TxStatus,
    synthesized: bool,
}

impl CorrelatedLogs {
    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next entry in message order. Once taken, an entry is gone.
    pub fn take_next(&mut self) -> Option<LogEntry> {
        self.entries.pop_front()
    }
}

/// Pull a human-readable message out of a log value: `{ "message": .. }`, a JSON string holding
/// such an object, or plain text.
fn error_text(log: &serde_json::Value) -> Option<String> {
    match log {
        serde_json::Value::Object(m) => m
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(parsed @ serde_json::Value::Object(_)) => error_text(&parsed),
                _ => Some(s.clone()),
            }
        }
        _ => None,
    }
}

fn entry_from_raw(index: usize, raw: &RawLog) -> LogEntry {
    let success = raw.success.unwrap_or(true);
    LogEntry {
        message_index: raw
            .msg_index
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(index),
        success,
        events: raw.events.clone(),
        error_text: if success { None } else { error_text(&raw.log) },
    }
}

/// Synthesize the single failing entry from a raw error string.
fn entry_from_raw_log(raw_log: &str) -> LogEntry {
    let text = match serde_json::from_str::<serde_json::Value>(raw_log) {
        Ok(v) => error_text(&v).or_else(|| Some(raw_log.to_string())),
        Err(_) => Some(raw_log.to_string()),
    };
    LogEntry {
        message_index: 0,
        success: false,
        events: vec![],
        error_text: text,
    }
}

/// Build the per-message log queue for `tx`.
///
/// Structured logs pair positionally with messages. Without them, a non-empty `raw_log` becomes
/// one failing entry for message 0. A transaction with no messages, or with neither form of log,
/// is failed with no error text. A structured log count that differs from the message count is
/// failed as well.
pub fn correlate(tx: &RawTransaction) -> CorrelatedLogs {
    let msg_count = tx.messages().len();
    if msg_count == 0 {
        return CorrelatedLogs::default();
    }

    if let Some(logs) = &tx.logs {
        let entries: VecDeque<LogEntry> = logs
            .iter()
            .enumerate()
            .map(|(i, raw)| entry_from_raw(i, raw))
            .collect();
        let status = if entries.len() != msg_count {
            warn!(
                hash = %tx.hash,
                messages = msg_count,
                logs = entries.len(),
                "log count does not match message count"
            );
            TxStatus {
                success: false,
                error_message: entries.iter().find(|e| !e.success).and_then(|e| e.error_text.clone()),
            }
        } else {
            status_of(&entries)
        };
        return CorrelatedLogs {
            entries,
            status,
            synthesized: false,
        };
    }

    match tx.raw_log.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let entry = entry_from_raw_log(raw);
            let status = TxStatus {
                success: false,
                error_message: entry.error_text.clone(),
            };
            CorrelatedLogs {
                entries: VecDeque::from([entry]),
                status,
                synthesized: true,
            }
        }
        _ => CorrelatedLogs::default(),
    }
}

/// Successful iff no entry failed; the first failing entry supplies the error message.
fn status_of(entries: &VecDeque<LogEntry>) -> TxStatus {
    match entries.iter().find(|e| !e.success) {
        Some(failed) => TxStatus {
            success: false,
            error_message: failed.error_text.clone(),
        },
        None => TxStatus {
            success: true,
            error_message: None,
        },
    }
}

/// Convenience: transaction-level outcome only.
pub fn is_successful(tx: &RawTransaction) -> TxStatus {
    correlate(tx).status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::RawMessage;

    fn tx_with(msgs: usize, logs: Option<serde_json::Value>, raw_log: Option<&str>) -> RawTransaction {
        let mut tx = RawTransaction {
            hash: "H".into(),
            ..Default::default()
        };
        tx.tx.value.msg = (0..msgs)
            .map(|_| RawMessage {
                type_tag: "bank/MsgSend".into(),
                value: serde_json::json!({}),
            })
            .collect();
        tx.logs = logs.map(|l| serde_json::from_value(l).unwrap());
        tx.raw_log = raw_log.map(str::to_string);
        tx
    }

    #[test]
    fn pairs_entries_in_order() {
        let tx = tx_with(
            2,
            Some(serde_json::json!([
                { "msg_index": "0", "success": true, "log": "", "events": [] },
                { "msg_index": "1", "success": true, "log": "", "events": [] }
            ])),
            None,
        );
        let mut logs = correlate(&tx);
        assert!(logs.status().success);
        assert_eq!(logs.take_next().unwrap().message_index, 0);
        assert_eq!(logs.take_next().unwrap().message_index, 1);
        assert!(logs.take_next().is_none());
    }

    #[test]
    fn first_failure_sets_error_message() {
        let tx = tx_with(
            2,
            Some(serde_json::json!([
                { "success": true, "log": "" },
                { "success": false, "log": { "code": 5, "message": "insufficient funds" } }
            ])),
            None,
        );
        let status = is_successful(&tx);
        assert!(!status.success);
        assert_eq!(status.error_message.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn raw_log_synthesizes_one_failed_entry() {
        let tx = tx_with(
            3,
            None,
            Some(r#"{"codespace":"sdk","code":11,"message":"out of gas"}"#),
        );
        let mut logs = correlate(&tx);
        assert!(logs.is_synthesized());
        assert_eq!(logs.len(), 1);
        assert_eq!(logs.status().error_message.as_deref(), Some("out of gas"));
        let first = logs.take_next().unwrap();
        assert_eq!(first.message_index, 0);
        assert!(!first.success);
        assert!(logs.take_next().is_none());
    }

    #[test]
    fn raw_log_plain_text_is_kept() {
        let tx = tx_with(1, None, Some("signature verification failed"));
        let status = is_successful(&tx);
        assert!(!status.success);
        assert_eq!(
            status.error_message.as_deref(),
            Some("signature verification failed")
        );
    }

    #[test]
    fn no_messages_or_no_logs_is_failed_without_text() {
        let empty = tx_with(0, Some(serde_json::json!([])), None);
        assert_eq!(is_successful(&empty), TxStatus::default());
        let bare = tx_with(2, None, None);
        let logs = correlate(&bare);
        assert!(logs.is_empty());
        assert_eq!(logs.status(), &TxStatus::default());
    }

    #[test]
    fn count_mismatch_is_failed() {
        let tx = tx_with(2, Some(serde_json::json!([{ "success": true, "log": "" }])), None);
        assert!(!is_successful(&tx).success);
    }
}
