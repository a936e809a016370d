use std::io::{Read, Write};
use std::net::TcpStream;

use async_trait::async_trait;
use mailfeed_domain::{Credential, MailSession, MailboxConfig, RawMessage, SessionMessageRef};
use mailfeed_error::MailError;
use tracing::{debug, info};

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;
type PlainSession = imap::Session<TcpStream>;

enum ImapConnection {
    Tls(TlsSession),
    Plain(PlainSession),
}

impl ImapConnection {
    fn search_all_uids(&mut self) -> Result<Vec<u32>, MailError> {
        match self {
            Self::Tls(s) => search_all_uids(s),
            Self::Plain(s) => search_all_uids(s),
        }
    }

    fn fetch_body(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
        match self {
            Self::Tls(s) => fetch_body(s, uid),
            Self::Plain(s) => fetch_body(s, uid),
        }
    }

    fn flag_deleted(&mut self, uid: u32) -> Result<(), MailError> {
        match self {
            Self::Tls(s) => flag_deleted(s, uid),
            Self::Plain(s) => flag_deleted(s, uid),
        }
    }

    fn expunge_now(&mut self) -> Result<(), MailError> {
        match self {
            Self::Tls(s) => expunge_now(s),
            Self::Plain(s) => expunge_now(s),
        }
    }

    fn finish(&mut self) -> Result<(), MailError> {
        match self {
            Self::Tls(s) => finish(s),
            Self::Plain(s) => finish(s),
        }
    }
}

fn search_all_uids<T: Read + Write>(session: &mut imap::Session<T>) -> Result<Vec<u32>, MailError> {
    let found = session
        .uid_search("ALL")
        .map_err(|e| MailError::protocol(format!("IMAP SEARCH: {e}")))?;
    let mut uids: Vec<u32> = found.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

fn fetch_body<T: Read + Write>(
    session: &mut imap::Session<T>,
    uid: u32,
) -> Result<Vec<u8>, MailError> {
    let fetches = session
        .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
        .map_err(|e| MailError::protocol(format!("IMAP FETCH {uid}: {e}")))?;
    let fetch = fetches
        .iter()
        .find(|f| f.uid == Some(uid))
        .or_else(|| fetches.iter().next())
        .ok_or_else(|| MailError::protocol(format!("IMAP FETCH {uid}: empty response")))?;
    let body = fetch
        .body()
        .ok_or_else(|| MailError::protocol(format!("IMAP FETCH {uid}: no body returned")))?;
    Ok(body.to_vec())
}

fn flag_deleted<T: Read + Write>(
    session: &mut imap::Session<T>,
    uid: u32,
) -> Result<(), MailError> {
    session
        .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
        .map(|_| ())
        .map_err(|e| MailError::protocol(format!("IMAP STORE {uid}: {e}")))
}

fn expunge_now<T: Read + Write>(session: &mut imap::Session<T>) -> Result<(), MailError> {
    session
        .expunge()
        .map(|_| ())
        .map_err(|e| MailError::protocol(format!("IMAP EXPUNGE: {e}")))
}

fn finish<T: Read + Write>(session: &mut imap::Session<T>) -> Result<(), MailError> {
    // CLOSE deselects INBOX; a failure there must not skip the LOGOUT.
    if let Err(e) = session.close() {
        debug!(error = %e, "IMAP CLOSE failed");
    }
    session
        .logout()
        .map_err(|e| MailError::protocol(format!("IMAP LOGOUT: {e}")))
}

fn connect(config: &MailboxConfig, credential: &Credential) -> Result<ImapConnection, MailError> {
    let addr = (config.host.as_str(), config.port);
    let mut conn = if config.secure {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| MailError::connection(format!("TLS init: {e}")))?;
        let client = imap::connect(addr, &config.host, &tls).map_err(|e| {
            MailError::connection(format!("IMAP connect {}:{}: {e}", config.host, config.port))
        })?;
        let session = client
            .login(&credential.username, &credential.password)
            .map_err(|(e, _)| MailError::auth(format!("IMAP login: {e}")))?;
        ImapConnection::Tls(session)
    } else {
        let tcp = TcpStream::connect(addr).map_err(|e| {
            MailError::connection(format!("IMAP connect {}:{}: {e}", config.host, config.port))
        })?;
        let mut client = imap::Client::new(tcp);
        client.read_greeting().map_err(|e| {
            MailError::connection(format!("IMAP greeting {}:{}: {e}", config.host, config.port))
        })?;
        let session = client
            .login(&credential.username, &credential.password)
            .map_err(|(e, _)| MailError::auth(format!("IMAP login: {e}")))?;
        ImapConnection::Plain(session)
    };

    // EXAMINE keeps readonly passes from touching any flags.
    let readonly = !config.cleanup.requires_write_access();
    match &mut conn {
        ImapConnection::Tls(s) => open_inbox(s, readonly)?,
        ImapConnection::Plain(s) => open_inbox(s, readonly)?,
    }
    Ok(conn)
}

fn open_inbox<T: Read + Write>(
    session: &mut imap::Session<T>,
    readonly: bool,
) -> Result<(), MailError> {
    let mailbox = if readonly {
        session.examine("INBOX")
    } else {
        session.select("INBOX")
    }
    .map_err(|e| MailError::protocol(format!("IMAP SELECT INBOX: {e}")))?;
    debug!(exists = mailbox.exists, readonly, "INBOX opened");
    Ok(())
}

pub struct ImapMailbox {
    account: String,
    conn: Option<ImapConnection>,
}

impl ImapMailbox {
    pub async fn open(config: &MailboxConfig, credential: &Credential) -> Result<Self, MailError> {
        let account = config.account.clone();
        let config = config.clone();
        let credential = credential.clone();
        let conn = tokio::task::spawn_blocking(move || connect(&config, &credential))
            .await
            .map_err(|e| MailError::internal(format!("spawn: {e}")))??;
        info!(account = %account, "IMAP session opened");
        Ok(Self {
            account,
            conn: Some(conn),
        })
    }

    async fn with_conn<F, R>(&mut self, f: F) -> Result<R, MailError>
    where
        F: FnOnce(&mut ImapConnection) -> Result<R, MailError> + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => return Err(MailError::protocol("IMAP session already closed")),
        };
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| MailError::internal(format!("spawn: {e}")))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl MailSession for ImapMailbox {
    async fn list_messages(&mut self) -> Result<Vec<SessionMessageRef>, MailError> {
        let uids = self.with_conn(|conn| conn.search_all_uids()).await?;
        Ok(uids.into_iter().map(SessionMessageRef).collect())
    }

    async fn fetch(&mut self, msg: &SessionMessageRef) -> Result<RawMessage, MailError> {
        let uid = msg.0;
        let bytes = self.with_conn(move |conn| conn.fetch_body(uid)).await?;
        Ok(RawMessage {
            session_ref: *msg,
            bytes,
        })
    }

    async fn mark_deleted(&mut self, msg: &SessionMessageRef) -> Result<(), MailError> {
        let uid = msg.0;
        self.with_conn(move |conn| conn.flag_deleted(uid)).await
    }

    async fn commit_deletions(&mut self) -> Result<(), MailError> {
        self.with_conn(|conn| conn.expunge_now()).await
    }

    async fn close(&mut self) -> Result<(), MailError> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => return Ok(()),
        };
        tokio::task::spawn_blocking(move || conn.finish())
            .await
            .map_err(|e| MailError::internal(format!("spawn: {e}")))??;
        debug!(account = %self.account, "IMAP session closed");
        Ok(())
    }
}
