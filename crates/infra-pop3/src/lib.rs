mod client;

use async_trait::async_trait;
use mailfeed_domain::{Credential, MailSession, MailboxConfig, RawMessage, SessionMessageRef};
use mailfeed_error::MailError;
use tracing::{debug, info};

use crate::client::{Pop3Client, Transport};

pub struct Pop3Mailbox {
    account: String,
    client: Option<Pop3Client<Transport>>,
}

impl Pop3Mailbox {
    pub async fn open(config: &MailboxConfig, credential: &Credential) -> Result<Self, MailError> {
        let account = config.account.clone();
        let config = config.clone();
        let credential = credential.clone();
        let client = tokio::task::spawn_blocking(move || {
            let mut client = Pop3Client::connect(&config.host, config.port, config.secure)?;
            client.login(&credential.username, &credential.password)?;
            let (count, octets) = client.stat()?;
            debug!(count, octets, "POP3 mailbox status");
            Ok::<_, MailError>(client)
        })
        .await
        .map_err(|e| MailError::internal(format!("spawn: {e}")))??;
        info!(account = %account, "POP3 session opened");
        Ok(Self {
            account,
            client: Some(client),
        })
    }

    async fn with_client<F, R>(&mut self, f: F) -> Result<R, MailError>
    where
        F: FnOnce(&mut Pop3Client<Transport>) -> Result<R, MailError> + Send + 'static,
        R: Send + 'static,
    {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => return Err(MailError::protocol("POP3 session already closed")),
        };
        let (client, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut client);
            (client, result)
        })
        .await
        .map_err(|e| MailError::internal(format!("spawn: {e}")))?;
        self.client = Some(client);
        result
    }
}

#[async_trait]
impl MailSession for Pop3Mailbox {
    async fn list_messages(&mut self) -> Result<Vec<SessionMessageRef>, MailError> {
        let ids = self.with_client(|client| client.list()).await?;
        Ok(ids.into_iter().map(SessionMessageRef).collect())
    }

    async fn fetch(&mut self, msg: &SessionMessageRef) -> Result<RawMessage, MailError> {
        let id = msg.0;
        let bytes = self.with_client(move |client| client.retr(id)).await?;
        Ok(RawMessage {
            session_ref: *msg,
            bytes,
        })
    }

    async fn mark_deleted(&mut self, msg: &SessionMessageRef) -> Result<(), MailError> {
        let id = msg.0;
        self.with_client(move |client| client.dele(id)).await
    }

    // DELE marks only; the server commits at QUIT, so there is nothing to
    // flush mid-session.
    async fn commit_deletions(&mut self) -> Result<(), MailError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MailError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => return Ok(()),
        };
        tokio::task::spawn_blocking(move || client.quit())
            .await
            .map_err(|e| MailError::internal(format!("spawn: {e}")))??;
        debug!(account = %self.account, "POP3 session closed");
        Ok(())
    }
}
