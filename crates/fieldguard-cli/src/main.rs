//! fieldguard - command-line client for a portal session.
//!
//! Restores the stored session for one portal, then runs a single command
//! against it: sign in or out, refresh, or ask the route guard what a page
//! would do for the current user.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldguard_core::{
    AccessGuard, AuthError, GuardDecision, HttpAuthApi, Portal, PortalConfig, SessionManager,
    SessionState, TransitionLogger,
};

// ============================================================================
// Constants
// ============================================================================

const PASSWORD_ENV: &str = "FIELDGUARD_PASSWORD";
const LOG_FILE_PREFIX: &str = "fieldguard.log";

const USAGE: &str = "\
Usage: fieldguard [--portal <admin|customer|technician>] <command>

Commands:
  status           Show the current session
  login [email]    Sign in (password from FIELDGUARD_PASSWORD or prompt)
  logout           Sign out and clear stored tokens
  refresh          Exchange the refresh token for a new pair
  check <route>    Show what the guard decides for a route
  nav              List the routes visible to the current role";

enum Command {
    Status,
    Login(Option<String>),
    Logout,
    Refresh,
    Check(String),
    Nav,
}

struct Args {
    portal: Portal,
    command: Command,
}

/// Initialize the tracing subscriber: stderr plus a daily log file in the
/// cache directory when one is available.
fn init_tracing(config: &PortalConfig) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=fieldguard_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut portal = Portal::Admin;
    let mut rest = args.iter().skip(1).peekable();

    while let Some(&arg) = rest.peek() {
        match arg.as_str() {
            "--portal" | "-p" => {
                rest.next();
                let value = rest.next().context("--portal needs a value")?;
                portal = Portal::parse(value)
                    .with_context(|| format!("Unknown portal '{}'", value))?;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => break,
        }
    }

    let command = match rest.next().map(String::as_str) {
        Some("status") | None => Command::Status,
        Some("login") => Command::Login(rest.next().cloned()),
        Some("logout") => Command::Logout,
        Some("refresh") => Command::Refresh,
        Some("check") => Command::Check(rest.next().cloned().context("check needs a route")?),
        Some("nav") => Command::Nav,
        Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    Ok(Args { portal, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let argv: Vec<String> = std::env::args().collect();
    let args = parse_args(&argv)?;

    let config = PortalConfig::load(args.portal)?;
    let _log_guard = init_tracing(&config);
    info!(portal = %config.portal, api = %config.api_base_url, "fieldguard starting");

    let api = HttpAuthApi::from_config(&config).context("Failed to build HTTP client")?;
    let store = config.open_token_store();
    let session = SessionManager::new(config, Arc::new(api), store);
    session.subscribe(TransitionLogger::listener());

    session.restore().await;
    if session.is_storage_degraded() {
        eprintln!("Warning: token storage unavailable, this session will not be remembered");
    }

    match args.command {
        Command::Status => print_status(&session),
        Command::Login(email) => login(&session, email).await?,
        Command::Logout => {
            session.logout().await;
            println!("Signed out.");
        }
        Command::Refresh => match session.refresh().await {
            Ok(identity) => println!(
                "Session renewed, expires in {} minutes.",
                identity.minutes_until_expiry(Utc::now())
            ),
            Err(e) => bail!("Refresh failed: {}", e.user_message()),
        },
        Command::Check(route) => {
            let guard = AccessGuard::for_portal(session.config());
            match guard.check_session(&session, &route) {
                GuardDecision::Loading => println!("{}: loading", route),
                GuardDecision::Render => println!("{}: render", route),
                GuardDecision::Redirect { to, reason } => {
                    println!("{}: redirect to {} ({:?})", route, to, reason)
                }
            }
        }
        Command::Nav => {
            let Some(role) = session.role() else {
                bail!("Not signed in");
            };
            let guard = AccessGuard::for_portal(session.config());
            for route in guard.hierarchy().navigation(role) {
                println!("{}", route);
            }
        }
    }

    info!("fieldguard done");
    Ok(())
}

fn print_status(session: &SessionManager) {
    let snapshot = session.snapshot();
    match &snapshot.state {
        SessionState::Authenticated(identity) => {
            println!("Signed in to the {} portal", session.config().portal);
            println!("  user:    {}", identity.user_id);
            println!("  role:    {}", identity.role);
            println!(
                "  expires: {} ({} minutes)",
                identity.expires_at.format("%Y-%m-%d %H:%M UTC"),
                identity.minutes_until_expiry(Utc::now())
            );
        }
        SessionState::Error(reason) => println!("Session unavailable: {}", reason),
        state => println!("Not signed in ({})", state.name()),
    }
    if let Some(error) = &snapshot.last_error {
        println!("Last error: {}", error.user_message());
    }
}

async fn login(session: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    match session.login(&email, &password).await {
        Ok(identity) => {
            println!("Signed in as {} ({})", identity.user_id, identity.role);
            Ok(())
        }
        Err(AuthError::Superseded) => bail!("Sign-in was interrupted"),
        Err(e) => bail!("{}", e.user_message()),
    }
}
