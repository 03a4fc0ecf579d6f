//! Wallet CLI - binary entry point and terminal session management.
//!
//! # Architecture
//!
//! The CLI wires [`wallet_platform`] (hosted auth, queries, change feed) into
//! [`wallet_engine`] (identity, visibility, synchronization) and renders the
//! resulting balance view as a single inline card.
//!
//! ```text
//! main() -> Platform::connect -> watch()
//!                                  |-- IdentityResolver  (auth client + session file watch)
//!                                  |-- HostPump          (terminal focus -> VisibilitySignal)
//!                                  `-- BalanceSynchronizer (rest + realtime) -> card::draw
//! ```
//!
//! The remaining subcommands (`login`, `logout`, `balance`) are one-shot
//! operations against the same platform clients.

mod card;
mod host;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{TerminalOptions, Viewport, prelude::*};
use std::{
    env,
    fs::{self, OpenOptions},
    io::{IsTerminal, Stdout, Write, stdout},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use wallet_config::WalletConfig;
use wallet_engine::{BalanceSynchronizer, IdentityResolver, SynchronizerHandle, VisibilitySignal};
use wallet_platform::{
    BalanceSource, Platform, PlatformSettings, SESSION_POLL_INTERVAL, SessionSource,
};
use wallet_types::SecretString;

use host::{HostEvent, HostPump};

/// Password source for `wallet login` when not prompting.
const PASSWORD_ENV: &str = "WALLET_PASSWORD";

#[derive(Parser)]
#[command(name = "wallet")]
#[command(about = "Show your account balance and keep it live while the terminal has focus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Show the balance card and keep it current (default)
    Watch,
    /// Sign in with email and password
    Login {
        email: String,
    },
    /// Sign out and forget the cached session
    Logout,
    /// Fetch the balance once and print it
    Balance,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_wallet_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: drop logs rather than scribble over the card.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_wallet_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in wallet_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn wallet_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.wallet/logs/wallet.log
    if let Some(config_dir) = wallet_config::config_dir() {
        candidates.push(config_dir.join("logs").join("wallet.log"));
    }

    // Fallback: ./.wallet/logs/wallet.log
    candidates.push(PathBuf::from(".wallet").join("logs").join("wallet.log"));

    candidates
}

/// RAII wrapper for the inline card viewport.
///
/// Raw mode and terminal focus reporting are enabled for the lifetime of the
/// session and restored on drop, including after early returns and panics.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn new() -> Result<Self> {
        enable_raw_mode()?;

        let mut out = stdout();
        if let Err(err) = execute!(out, EnableFocusChange) {
            let _ = disable_raw_mode();
            return Err(err.into());
        }

        let terminal = Terminal::with_options(
            CrosstermBackend::new(out),
            TerminalOptions {
                viewport: Viewport::Inline(card::CARD_HEIGHT),
            },
        );
        let terminal = match terminal {
            Ok(t) => t,
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(stdout(), DisableFocusChange);
                return Err(err.into());
            }
        };

        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), DisableFocusChange);
        let _ = self.terminal.clear();
        let _ = self.terminal.show_cursor();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = WalletConfig::load()
        .context("loading ~/.wallet/config.toml")?
        .unwrap_or_default();
    let settings = PlatformSettings::from_config(&config)?;
    let platform = Platform::connect(settings)?;

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(&platform, &config.currency()).await,
        Command::Login { email } => login(&platform, &email).await,
        Command::Logout => {
            platform.auth.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Balance => balance(&platform, &config.currency()).await,
    }
}

async fn watch(platform: &Platform, currency: &str) -> Result<()> {
    // Nothing is resolved, fetched or subscribed unless the card can be shown.
    let mut session = TerminalSession::new()
        .context("terminal setup failed (wallet watch needs a terminal)")?;
    let signal = VisibilitySignal::new(host::initial_visibility());

    // Picks up `wallet login` / `wallet logout` run from other terminals.
    let _cache_watch = platform.auth.watch_cache(SESSION_POLL_INTERVAL);
    let resolver = IdentityResolver::spawn(Arc::clone(&platform.auth));
    let sync = BalanceSynchronizer::new(
        Arc::clone(&platform.rest),
        Arc::clone(&platform.realtime),
        resolver.subscribe(),
        signal.subscribe(),
    )
    .spawn();

    let result = run_card(&mut session.terminal, &resolver, &sync, signal, currency).await;

    sync.shutdown().await;
    resolver.shutdown().await;
    result
}

async fn run_card(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    resolver: &IdentityResolver,
    sync: &SynchronizerHandle,
    signal: VisibilitySignal,
    currency: &str,
) -> Result<()> {
    let mut host = HostPump::new(signal);
    let mut identity = resolver.subscribe();
    let mut view = sync.view();

    let result: Result<()> = loop {
        let user = identity.borrow_and_update().clone();
        let current = *view.borrow_and_update();
        if let Err(e) =
            terminal.draw(|frame| card::draw(frame, current, currency, user.as_ref()))
        {
            break Err(e.into());
        }

        tokio::select! {
            event = host.recv() => match event {
                Some(HostEvent::Redraw) => {}
                Some(HostEvent::Quit) | None => break Ok(()),
                Some(HostEvent::Error(e)) => break Err(anyhow!("terminal input failed: {e}")),
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            changed = identity.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    host.shutdown().await;
    result
}

async fn login(platform: &Platform, email: &str) -> Result<()> {
    let password = read_password()?;
    let user = platform
        .auth
        .sign_in_with_password(email, &password)
        .await
        .context("sign-in failed")?;
    println!("Signed in as {user}");
    Ok(())
}

async fn balance(platform: &Platform, currency: &str) -> Result<()> {
    let Some(user) = platform
        .auth
        .resolve_session()
        .await
        .context("resolving session")?
    else {
        bail!("not signed in (run `wallet login <email>`)");
    };
    let amount = platform.rest.fetch_balance(&user).await?;
    println!("{}", card::format_amount(amount, currency));
    Ok(())
}

fn read_password() -> Result<SecretString> {
    if let Ok(password) = env::var(PASSWORD_ENV)
        && !password.is_empty()
    {
        return Ok(password.into());
    }

    let password = if std::io::stdin().is_terminal() {
        prompt_hidden("Password: ")?
    } else {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("reading password from stdin")?;
        SecretString::new(line.trim_end_matches(['\r', '\n']))
    };

    if password.is_empty() {
        bail!("no password given (set {PASSWORD_ENV} or pipe it on stdin)");
    }
    Ok(password)
}

/// Read a line from the terminal without echoing it.
fn prompt_hidden(prompt: &str) -> Result<SecretString> {
    let mut err = std::io::stderr();
    write!(err, "{prompt}")?;
    err.flush()?;

    enable_raw_mode()?;
    let entered = read_hidden_line();
    let _ = disable_raw_mode();
    let _ = writeln!(err);
    entered.map(SecretString::new)
}

fn read_hidden_line() -> Result<String> {
    let mut entered = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(entered),
            KeyCode::Backspace => {
                entered.pop();
            }
            KeyCode::Esc => bail!("cancelled"),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                bail!("cancelled")
            }
            KeyCode::Char(c) => entered.push(c),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, wallet_log_file_candidates, watch};
    use clap::Parser;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::time::Duration;
    use wallet_platform::{Platform, PlatformSettings, Session, SessionCache, SessionUser};
    use wallet_types::{SecretString, UserId};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn bare_invocation_watches() {
        let cli = Cli::try_parse_from(["wallet"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn login_takes_an_email() {
        let cli = Cli::try_parse_from(["wallet", "login", "u1@example.com"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Login {
                email: "u1@example.com".to_string()
            })
        );
        assert!(Cli::try_parse_from(["wallet", "login"]).is_err());
    }

    #[test]
    fn log_file_falls_back_to_working_directory() {
        let candidates = wallet_log_file_candidates();
        assert_eq!(
            candidates.last(),
            Some(&PathBuf::from(".wallet").join("logs").join("wallet.log"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watch_without_terminal_starts_nothing() {
        // Only meaningful where raw mode cannot be entered.
        if OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .is_ok()
        {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // An expired session would be refreshed as soon as the resolver ran.
        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.json");
        SessionCache::new(Some(session_path.clone()))
            .save(&Session {
                access_token: SecretString::new("access-u1"),
                refresh_token: SecretString::new("refresh-u1"),
                expires_at: 0,
                user: SessionUser {
                    id: UserId::new("u1").unwrap(),
                    email: None,
                },
            })
            .unwrap();
        let settings = PlatformSettings::new(&server.uri(), "anon", true)
            .unwrap()
            .with_session_path(&session_path);
        let platform = Platform::connect(settings).unwrap();

        assert!(watch(&platform, "€").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(platform.auth.listener_count(), 0);
    }
}
