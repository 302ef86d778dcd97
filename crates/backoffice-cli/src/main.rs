//! Backoffice CLI - a terminal shell over the backoffice admin API.
//!
//! Signs in, keeps the session alive across invocations and lists the
//! catalog. Every API call goes through the session coordinator, so an
//! expired access token is refreshed transparently.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use backoffice_core::api::CatalogApi;
use backoffice_core::session::{LogoutStatus, Navigator, SessionContext};
use backoffice_core::Config;
use chrono::Local;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "Usage: backoffice <login|logout|status|refresh|products|menus>";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; when `BACKOFFICE_LOG_DIR` is set they are also written
/// to a daily rotating file there. Keep the returned guard alive until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("BACKOFFICE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "backoffice.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
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

/// There is no screen to route; the CLI just remembers where the session
/// layer wanted to send the user.
struct TerminalNavigator {
    path: Mutex<String>,
}

impl TerminalNavigator {
    fn new() -> Self {
        Self {
            path: Mutex::new("/".to_string()),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        self.path
            .lock()
            .map(|path| path.clone())
            .unwrap_or_default()
    }

    fn navigate(&self, path: &str) {
        info!(to = path, "Session ended, login required");
        if let Ok(mut current) = self.path.lock() {
            *current = path.to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let command = std::env::args().nth(1).unwrap_or_default();
    if command.is_empty() || command == "--help" || command == "-h" {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    config.apply_env()?;

    let navigator = Arc::new(TerminalNavigator::new());
    let coordinator = Arc::new(config.build_coordinator(navigator)?);
    let context = SessionContext::new(coordinator.clone());

    match command.as_str() {
        "login" => login(&context, &mut config).await,
        "logout" => logout(&context).await,
        "status" => {
            status(&context);
            Ok(())
        }
        "refresh" => {
            require_session(&context)?;
            if coordinator.refresh_if_due().await? {
                println!("Access token refreshed.");
            } else {
                println!("Access token still valid.");
            }
            Ok(())
        }
        "products" => {
            require_session(&context)?;
            let products = CatalogApi::new(coordinator).list_products().await?;
            for product in &products {
                println!(
                    "{:>6}  {:<32} {:>10}  {}",
                    product.id.map(|id| id.to_string()).unwrap_or_default(),
                    product.name,
                    product.display_price(),
                    if product.is_available { "" } else { "(unavailable)" }
                );
            }
            Ok(())
        }
        "menus" => {
            require_session(&context)?;
            let menus = CatalogApi::new(coordinator).list_menus().await?;
            println!("{}", serde_json::to_string_pretty(&menus)?);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command: {}\n{}", other, USAGE)),
    }
}

fn require_session(context: &SessionContext) -> Result<()> {
    if context.state().is_authenticated {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Not logged in. Run `backoffice login` first."))
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim();
    Ok(match (username.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => username.to_string(),
    })
}

async fn login(context: &SessionContext, config: &mut Config) -> Result<()> {
    let username = prompt_username(config.last_username.as_deref())?;
    let password = rpassword::prompt_password("Password: ")?;
    if username.is_empty() || password.is_empty() {
        return Err(anyhow::anyhow!("Username and password required"));
    }

    let outcome = context
        .sign_in(&username, &password)
        .await
        .context("Login failed")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful!");
    if outcome.metadata.password_forceful {
        println!("Your password must be changed before continuing.");
    }
    Ok(())
}

async fn logout(context: &SessionContext) -> Result<()> {
    match context.logout().await {
        LogoutStatus::RemoteFailed => {
            println!("Signed out locally; the server could not be reached.")
        }
        _ => println!("Signed out."),
    }
    Ok(())
}

fn status(context: &SessionContext) {
    let store = context.coordinator().store();
    let credential = store.get();

    if !context.state().is_authenticated {
        println!("Not logged in.");
        return;
    }

    println!("Logged in.");
    if let Some(expiry) = credential
        .access_token
        .as_deref()
        .and_then(backoffice_core::auth::token::decode_expiry)
    {
        println!(
            "  Access token expires:  {}",
            expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(expiry) = credential.refresh_token_expiry {
        println!(
            "  Session expires:       {}",
            expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(session) = store.persisted_session() {
        if !session.groups.is_empty() {
            println!("  Groups:                {}", session.groups.join(", "));
        }
    }
}
