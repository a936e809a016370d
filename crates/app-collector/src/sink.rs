use async_trait::async_trait;
use mailfeed_domain::{EventSink, NormalizedEvent};
use mailfeed_error::MailError;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

#[derive(Serialize)]
struct EventLine<'a> {
    time: String,
    account: &'a str,
    host: &'a str,
    source: &'a str,
    message_id: &'a str,
    body: &'a str,
}

/// One JSON object per line on the wrapped writer. Events from concurrent
/// mailbox tasks interleave whole lines, never partial ones.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl JsonLinesSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for JsonLinesSink<W> {
    async fn emit(&self, event: NormalizedEvent) -> Result<(), MailError> {
        let line = EventLine {
            time: epoch_seconds(event.timestamp_ms),
            account: &event.account,
            host: &event.host,
            source: &event.source,
            message_id: event.message_id.as_str(),
            body: &event.body,
        };
        let mut json = serde_json::to_vec(&line)
            .map_err(|e| MailError::sink(format!("serialize event: {e}")))?;
        json.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&json)
            .await
            .map_err(|e| MailError::sink(format!("write event: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| MailError::sink(format!("flush event: {e}")))
    }
}

// Epoch seconds with millisecond precision, e.g. "1704067200.000".
fn epoch_seconds(ts_ms: i64) -> String {
    let secs = ts_ms.div_euclid(1000);
    let millis = ts_ms.rem_euclid(1000);
    format!("{secs}.{millis:03}")
}
