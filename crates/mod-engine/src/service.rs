use std::time::{SystemTime, UNIX_EPOCH};

use mailfeed_domain::{
    CheckpointStore, CleanupPolicy, Disposition, EventSink, MailSession, MailboxConfig,
    NormalizedEvent, RunSummary, SessionMessageRef, StableMessageId,
};
use mailfeed_error::MailError;
use tracing::{debug, info, warn};

use crate::normalize::{normalize, NormalizeOptions, NormalizedMail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Emit,
    Skip,
    EmitThenDelete,
    DeleteOnly,
}

pub fn decide(policy: CleanupPolicy, already_indexed: bool) -> Action {
    match (policy, already_indexed) {
        (CleanupPolicy::Readonly | CleanupPolicy::Delayed, false) => Action::Emit,
        (CleanupPolicy::Readonly, true) => Action::Skip,
        (CleanupPolicy::Delete, false) => Action::EmitThenDelete,
        (CleanupPolicy::Delayed | CleanupPolicy::Delete, true) => Action::DeleteOnly,
    }
}

pub async fn run_mailbox(
    config: &MailboxConfig,
    session: &mut dyn MailSession,
    checkpoints: &dyn CheckpointStore,
    sink: &dyn EventSink,
) -> Result<RunSummary, MailError> {
    let opts = NormalizeOptions::from(config);
    let mut summary = RunSummary::default();

    let refs = match session.list_messages().await {
        Ok(refs) => refs,
        Err(e) => {
            close_quietly(session, config).await;
            return Err(e);
        }
    };
    info!(
        account = %config.account,
        host = %config.host,
        policy = %config.cleanup,
        count = refs.len(),
        "mailbox listed"
    );

    for msg_ref in &refs {
        match process_one(config, &opts, session, checkpoints, sink, *msg_ref, &mut summary).await
        {
            Ok(()) => {}
            Err(MailError::Parse(reason)) => {
                warn!(account = %config.account, msg = %msg_ref, reason, "skipping unparseable message");
                summary.parse_failures += 1;
            }
            Err(e) => {
                close_quietly(session, config).await;
                return Err(e);
            }
        }
    }

    session.close().await?;
    info!(account = %config.account, %summary, "mailbox pass complete");
    Ok(summary)
}

async fn process_one(
    config: &MailboxConfig,
    opts: &NormalizeOptions,
    session: &mut dyn MailSession,
    checkpoints: &dyn CheckpointStore,
    sink: &dyn EventSink,
    msg_ref: SessionMessageRef,
    summary: &mut RunSummary,
) -> Result<(), MailError> {
    let raw = session.fetch(&msg_ref).await?;
    let mail = normalize(&raw.bytes, opts, now_ms())?;
    let already_indexed = checkpoints.exists(&mail.id).await?;

    match decide(config.cleanup, already_indexed) {
        Action::Emit => {
            emit_and_checkpoint(config, sink, checkpoints, mail).await?;
            summary.emitted += 1;
        }
        Action::Skip => {
            debug!(account = %config.account, id = %mail.id, "already indexed, skipping");
            summary.skipped += 1;
        }
        Action::EmitThenDelete => {
            let id = mail.id.clone();
            emit_and_checkpoint(config, sink, checkpoints, mail).await?;
            summary.emitted += 1;
            delete_message(session, config, msg_ref, &id, summary).await;
        }
        Action::DeleteOnly => {
            debug!(account = %config.account, id = %mail.id, "already indexed, cleaning up");
            summary.skipped += 1;
            let id = mail.id.clone();
            delete_message(session, config, msg_ref, &id, summary).await;
        }
    }
    Ok(())
}

async fn emit_and_checkpoint(
    config: &MailboxConfig,
    sink: &dyn EventSink,
    checkpoints: &dyn CheckpointStore,
    mail: NormalizedMail,
) -> Result<(), MailError> {
    let id = mail.id.clone();
    debug!(
        account = %config.account,
        id = %id,
        ts = %format_timestamp(mail.timestamp_ms),
        "emitting event"
    );
    let event = NormalizedEvent {
        timestamp_ms: mail.timestamp_ms,
        message_id: mail.id,
        body: mail.body,
        account: config.account.clone(),
        host: config.host.clone(),
        source: config.source.clone(),
    };
    sink.emit(event).await?;
    // The checkpoint must be durable before any delete is attempted.
    checkpoints.record(&id).await
}

async fn delete_message(
    session: &mut dyn MailSession,
    config: &MailboxConfig,
    msg_ref: SessionMessageRef,
    id: &StableMessageId,
    summary: &mut RunSummary,
) {
    let mut disposition = Disposition::Retained;
    match session.mark_deleted(&msg_ref).await {
        Ok(()) => {
            disposition = Disposition::Flagged;
            match session.commit_deletions().await {
                Ok(()) => {
                    disposition = Disposition::Expunged;
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        account = %config.account,
                        msg = %msg_ref,
                        error = %e,
                        "expunge failed, message lingers until next pass"
                    );
                }
            }
        }
        Err(e) => {
            warn!(
                account = %config.account,
                msg = %msg_ref,
                error = %e,
                "delete failed, message stays in mailbox"
            );
        }
    }
    debug!(account = %config.account, id = %id, %disposition, "cleanup result");
}

async fn close_quietly(session: &mut dyn MailSession, config: &MailboxConfig) {
    if let Err(e) = session.close().await {
        debug!(account = %config.account, error = %e, "session close failed");
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn format_timestamp(ts_ms: i64) -> String {
    let secs = ts_ms.div_euclid(1000);
    let nanos = (ts_ms.rem_euclid(1000) as u32) * 1_000_000;
    match chrono::DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts_ms.to_string(),
    }
}
