mod config;
mod sink;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use mailfeed_checkpoint::FileCheckpointStore;
use mailfeed_domain::{EventSink, MailSession, Protocol, RunSummary};
use mailfeed_engine::run_mailbox;
use mailfeed_error::{ErrorReport, MailError};
use mailfeed_imap::ImapMailbox;
use mailfeed_pop3::Pop3Mailbox;
use tracing::{error, info};

use crate::config::{ResolvedMailbox, Settings};
use crate::sink::JsonLinesSink;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailfeed=info")),
        )
        .compact()
        .init();
}

fn config_path(args: &[String]) -> PathBuf {
    if let Some(path) = args.get(2) {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var("MAILFEED_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("mailfeed.toml")
}

async fn open_session(
    mailbox: &ResolvedMailbox,
) -> Result<Box<dyn MailSession + Send>, MailError> {
    match mailbox.config.protocol {
        Protocol::Imap => Ok(Box::new(
            ImapMailbox::open(&mailbox.config, &mailbox.credential).await?,
        )),
        Protocol::Pop3 => Ok(Box::new(
            Pop3Mailbox::open(&mailbox.config, &mailbox.credential).await?,
        )),
    }
}

async fn run_one(
    mailbox: ResolvedMailbox,
    checkpoint_dir: PathBuf,
    sink: Arc<dyn EventSink>,
) -> Result<RunSummary, MailError> {
    let store = FileCheckpointStore::open(checkpoint_dir.join(&mailbox.config.account)).await?;
    let mut session = open_session(&mailbox).await?;
    run_mailbox(&mailbox.config, session.as_mut(), &store, sink.as_ref()).await
}

async fn run_all(settings: Settings) -> Result<(), MailError> {
    let sink: Arc<dyn EventSink> = Arc::new(JsonLinesSink::stdout());

    let mut tasks = Vec::with_capacity(settings.mailboxes.len());
    for mailbox in settings.mailboxes {
        let account = mailbox.config.account.clone();
        let host = mailbox.config.host.clone();
        let checkpoint_dir = settings.checkpoint_dir.clone();
        let sink = sink.clone();
        let handle = tokio::spawn(run_one(mailbox, checkpoint_dir, sink));
        tasks.push((account, host, handle));
    }

    let mut failures = 0usize;
    for (account, host, handle) in tasks {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(MailError::internal(format!("mailbox task: {e}"))));
        match result {
            Ok(summary) => {
                info!(%account, %host, %summary, "mailbox run finished");
            }
            Err(e) => {
                failures += 1;
                let report = ErrorReport::from(&e);
                error!(%account, %host, report = %report.to_compact(), "mailbox run failed");
            }
        }
    }

    if failures > 0 {
        return Err(MailError::internal(format!(
            "{failures} mailbox run(s) failed"
        )));
    }
    Ok(())
}

/// Open and immediately close every configured session, so bad hosts and bad
/// credentials surface before the first real collection pass.
async fn check_all(settings: Settings) -> Result<(), MailError> {
    let mut failures = 0usize;
    for mailbox in settings.mailboxes {
        let account = mailbox.config.account.clone();
        let host = mailbox.config.host.clone();
        match open_session(&mailbox).await {
            Ok(mut session) => {
                if let Err(e) = session.close().await {
                    info!(%account, %host, error = %e, "session opened but close failed");
                }
                info!(%account, %host, "connectivity ok");
            }
            Err(e) => {
                failures += 1;
                let report = ErrorReport::from(&e);
                error!(%account, %host, report = %report.to_compact(), "connectivity check failed");
            }
        }
    }

    if failures > 0 {
        return Err(MailError::internal(format!(
            "{failures} connectivity check(s) failed"
        )));
    }
    Ok(())
}

fn print_help() {
    eprintln!("mailfeed — mailbox-to-event collector (POP3/IMAP)");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  mailfeed run [config.toml]     Collect all configured mailboxes (default)");
    eprintln!("  mailfeed check [config.toml]   Validate connectivity and credentials");
    eprintln!("  mailfeed help                  Show this help");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  MAILFEED_CONFIG   Config file path (default: mailfeed.toml)");
    eprintln!("  RUST_LOG          Log level (default: mailfeed=info)");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    let outcome = match cmd {
        "run" => match config::load(&config_path(&args)) {
            Ok(settings) => run_all(settings).await,
            Err(e) => Err(e),
        },
        "check" => match config::load(&config_path(&args)) {
            Ok(settings) => check_all(settings).await,
            Err(e) => Err(e),
        },
        "help" | "--help" | "-h" => {
            print_help();
            return;
        }
        unknown => {
            eprintln!("Unknown command: {unknown}");
            eprintln!("Run `mailfeed help` for usage");
            std::process::exit(2);
        }
    };

    if let Err(e) = outcome {
        error!(%e, "fatal error");
        std::process::exit(1);
    }
}
