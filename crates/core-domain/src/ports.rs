use async_trait::async_trait;
use mailfeed_error::MailError;

use crate::entities::{NormalizedEvent, RawMessage, SessionMessageRef, StableMessageId};

#[async_trait]
pub trait MailSession: Send {
    async fn list_messages(&mut self) -> Result<Vec<SessionMessageRef>, MailError>;

    async fn fetch(&mut self, msg: &SessionMessageRef) -> Result<RawMessage, MailError>;

    async fn mark_deleted(&mut self, msg: &SessionMessageRef) -> Result<(), MailError>;

    async fn commit_deletions(&mut self) -> Result<(), MailError>;

    async fn close(&mut self) -> Result<(), MailError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn exists(&self, id: &StableMessageId) -> Result<bool, MailError>;

    async fn record(&self, id: &StableMessageId) -> Result<(), MailError>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: NormalizedEvent) -> Result<(), MailError>;
}
