use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Pop3,
    Imap,
}

impl Protocol {
    pub fn default_port(&self, secure: bool) -> u16 {
        match (self, secure) {
            (Self::Pop3, true) => 995,
            (Self::Pop3, false) => 110,
            (Self::Imap, true) => 993,
            (Self::Imap, false) => 143,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pop3 => write!(f, "pop3"),
            Self::Imap => write!(f, "imap"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pop3" => Ok(Self::Pop3),
            "imap" => Ok(Self::Imap),
            _ => Err(format!("unknown protocol: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    Readonly,
    Delayed,
    Delete,
}

impl CleanupPolicy {
    pub fn requires_write_access(&self) -> bool {
        matches!(self, Self::Delayed | Self::Delete)
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Readonly => write!(f, "readonly"),
            Self::Delayed => write!(f, "delayed"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "readonly" => Ok(Self::Readonly),
            "delayed" => Ok(Self::Delayed),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("unknown cleanup policy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MailboxConfig {
    pub account: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub secure: bool,
    pub cleanup: CleanupPolicy,
    pub include_headers: bool,
    pub strict_rfc: bool,
    pub attachment_primary: bool,
    pub source: String,
}

#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionMessageRef(pub u32);

impl fmt::Display for SessionMessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StableMessageId(String);

impl StableMessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub session_ref: SessionMessageRef,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedEvent {
    pub timestamp_ms: i64,
    pub message_id: StableMessageId,
    pub body: String,
    pub account: String,
    pub host: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Retained,
    Flagged,
    Expunged,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retained => write!(f, "retained"),
            Self::Flagged => write!(f, "flagged"),
            Self::Expunged => write!(f, "expunged"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub emitted: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub parse_failures: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "emitted {} message(s), skipped {}, deleted {}, parse failures {}",
            self.emitted, self.skipped, self.deleted, self.parse_failures
        )
    }
}

impl fmt::Display for NormalizedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.body.chars().take(80).collect();
        let suffix = if self.body.chars().count() > 80 {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "[{}:{}] {preview}{suffix}",
            self.account, self.message_id
        )
    }
}
