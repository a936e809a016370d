use std::env;
use std::path::{Path, PathBuf};

use mailfeed_domain::{CleanupPolicy, Credential, MailboxConfig, Protocol};
use mailfeed_error::MailError;
use serde::Deserialize;

const DEFAULT_SECURE: bool = true;
const DEFAULT_CLEANUP: CleanupPolicy = CleanupPolicy::Readonly;
const DEFAULT_INCLUDE_HEADERS: bool = true;
const DEFAULT_STRICT_RFC: bool = false;
const DEFAULT_ATTACHMENT_PRIMARY: bool = false;

/// Top-level TOML file: optional data directory plus one `[[mailbox]]`
/// stanza per account to poll.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default, rename = "mailbox")]
    pub mailboxes: Vec<MailboxStanza>,
}

// Booleans and the policy are Options on purpose: TOML absence means
// "unset, take the default", while an explicit `false` survives resolution.
#[derive(Debug, Deserialize)]
pub struct MailboxStanza {
    pub account: String,
    pub host: String,
    pub protocol: String,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub cleanup: Option<String>,
    pub include_headers: Option<bool>,
    pub strict_rfc: Option<bool>,
    pub attachment_primary: Option<bool>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_env: Option<String>,
}

#[derive(Debug)]
pub struct ResolvedMailbox {
    pub config: MailboxConfig,
    pub credential: Credential,
}

#[derive(Debug)]
pub struct Settings {
    pub checkpoint_dir: PathBuf,
    pub mailboxes: Vec<ResolvedMailbox>,
}

pub fn load(path: &Path) -> Result<Settings, MailError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MailError::config(format!("read {}: {e}", path.display())))?;
    let file: ConfigFile = toml::from_str(&text)
        .map_err(|e| MailError::config(format!("parse {}: {e}", path.display())))?;
    resolve(file)
}

pub fn resolve(file: ConfigFile) -> Result<Settings, MailError> {
    if file.mailboxes.is_empty() {
        return Err(MailError::config("no [[mailbox]] entries configured"));
    }
    let checkpoint_dir = file.checkpoint_dir.unwrap_or_else(default_data_dir);
    let mailboxes = file
        .mailboxes
        .into_iter()
        .map(resolve_mailbox)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Settings {
        checkpoint_dir,
        mailboxes,
    })
}

fn resolve_mailbox(stanza: MailboxStanza) -> Result<ResolvedMailbox, MailError> {
    let account = stanza.account.trim().to_string();
    if !is_email_address(&account) {
        return Err(MailError::config(format!(
            "account {account:?} is not an e-mail address"
        )));
    }
    if stanza.host.trim().is_empty() {
        return Err(MailError::config(format!(
            "mailbox {account}: host must not be empty"
        )));
    }

    let protocol: Protocol = stanza
        .protocol
        .parse()
        .map_err(|e| MailError::config(format!("mailbox {account}: {e}")))?;
    let cleanup = match &stanza.cleanup {
        Some(raw) => raw
            .parse()
            .map_err(|e| MailError::config(format!("mailbox {account}: {e}")))?,
        None => DEFAULT_CLEANUP,
    };
    let secure = stanza.secure.unwrap_or(DEFAULT_SECURE);
    let port = stanza.port.unwrap_or_else(|| protocol.default_port(secure));

    let password = resolve_password(&account, &stanza)?;
    let username = stanza.username.unwrap_or_else(|| account.clone());
    let source = stanza
        .name
        .unwrap_or_else(|| format!("{protocol}://{account}"));

    Ok(ResolvedMailbox {
        config: MailboxConfig {
            account,
            host: stanza.host.trim().to_string(),
            port,
            protocol,
            secure,
            cleanup,
            include_headers: stanza.include_headers.unwrap_or(DEFAULT_INCLUDE_HEADERS),
            strict_rfc: stanza.strict_rfc.unwrap_or(DEFAULT_STRICT_RFC),
            attachment_primary: stanza
                .attachment_primary
                .unwrap_or(DEFAULT_ATTACHMENT_PRIMARY),
            source,
        },
        credential: Credential { username, password },
    })
}

fn resolve_password(account: &str, stanza: &MailboxStanza) -> Result<String, MailError> {
    if let Some(password) = &stanza.password {
        return Ok(password.clone());
    }
    if let Some(var) = &stanza.password_env {
        return env::var(var).map_err(|_| {
            MailError::config(format!(
                "mailbox {account}: environment variable {var} is not set"
            ))
        });
    }
    Err(MailError::config(format!(
        "mailbox {account}: either password or password_env is required"
    )))
}

fn is_email_address(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && domain.contains('.')
        }
        None => false,
    }
}

fn default_data_dir() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mailfeed")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            "[[mailbox]]\naccount = \"reader@example.com\"\nhost = \"mail.example.com\"\nprotocol = \"imap\"\npassword = \"secret\"\n{extra}"
        )
    }

    fn parse(text: &str) -> Result<Settings, MailError> {
        resolve(toml::from_str::<ConfigFile>(text).unwrap())
    }

    #[test]
    fn minimal_mailbox_gets_defaults() {
        let settings = parse(&minimal("")).unwrap();
        let mb = &settings.mailboxes[0];
        assert_eq!(mb.config.protocol, Protocol::Imap);
        assert_eq!(mb.config.port, 993);
        assert!(mb.config.secure);
        assert_eq!(mb.config.cleanup, CleanupPolicy::Readonly);
        assert!(mb.config.include_headers);
        assert!(!mb.config.strict_rfc);
        assert!(!mb.config.attachment_primary);
        assert_eq!(mb.config.source, "imap://reader@example.com");
        assert_eq!(mb.credential.username, "reader@example.com");
        assert_eq!(mb.credential.password, "secret");
    }

    #[test]
    fn explicit_false_is_not_collapsed_into_the_default() {
        let settings = parse(&minimal("include_headers = false\n")).unwrap();
        assert!(!settings.mailboxes[0].config.include_headers);
    }

    #[test]
    fn insecure_pop3_defaults_to_port_110() {
        let text = minimal("").replace("imap", "pop3") + "secure = false\n";
        let settings = parse(&text).unwrap();
        assert_eq!(settings.mailboxes[0].config.port, 110);
        assert!(!settings.mailboxes[0].config.secure);
    }

    #[test]
    fn explicit_port_wins_over_default() {
        let settings = parse(&minimal("port = 1993\n")).unwrap();
        assert_eq!(settings.mailboxes[0].config.port, 1993);
    }

    #[test]
    fn cleanup_policy_is_parsed() {
        let settings = parse(&minimal("cleanup = \"delayed\"\n")).unwrap();
        assert_eq!(settings.mailboxes[0].config.cleanup, CleanupPolicy::Delayed);
        assert!(parse(&minimal("cleanup = \"purge\"\n")).is_err());
    }

    #[test]
    fn password_env_reads_the_environment() {
        env::set_var("MAILFEED_TEST_PASSWORD", "from-env");
        let text = minimal("").replace(
            "password = \"secret\"",
            "password_env = \"MAILFEED_TEST_PASSWORD\"",
        );
        let settings = parse(&text).unwrap();
        assert_eq!(settings.mailboxes[0].credential.password, "from-env");

        let missing = minimal("").replace(
            "password = \"secret\"",
            "password_env = \"MAILFEED_TEST_PASSWORD_MISSING\"",
        );
        assert!(matches!(parse(&missing), Err(MailError::Config(_))));
    }

    #[test]
    fn missing_credential_is_a_config_error() {
        let text = minimal("").replace("password = \"secret\"\n", "");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, MailError::Config(ref msg) if msg.contains("password")));
    }

    #[test]
    fn account_must_look_like_an_email_address() {
        for bad in ["reader", "@example.com", "reader@", "reader@localhost"] {
            let text = minimal("").replace("reader@example.com", bad);
            assert!(parse(&text).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn settings_debug_never_prints_the_password() {
        let settings = parse(&minimal("")).unwrap();
        let debug = format!("{settings:?}");
        assert!(debug.contains("reader@example.com"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = parse("").unwrap_err();
        assert!(matches!(err, MailError::Config(_)));
    }

    #[test]
    fn multiple_mailboxes_resolve_independently() {
        let text = format!(
            "{}\n[[mailbox]]\naccount = \"other@example.org\"\nhost = \"pop.example.org\"\nprotocol = \"pop3\"\npassword = \"p\"\ncleanup = \"delete\"\n",
            minimal("")
        );
        let settings = parse(&text).unwrap();
        assert_eq!(settings.mailboxes.len(), 2);
        assert_eq!(settings.mailboxes[1].config.protocol, Protocol::Pop3);
        assert_eq!(settings.mailboxes[1].config.port, 995);
        assert_eq!(settings.mailboxes[1].config.cleanup, CleanupPolicy::Delete);
    }
}
