//! PushVault CLI
//!
//! Command-line access to the PushVault storage layer. Every command prints
//! JSON to stdout; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Attach browser B1 to a subscription
//! pushvault subs put --owner alice --name market-news --browser B1 --uno U1
//!
//! # Read it back
//! pushvault subs get --owner alice --name market-news
//!
//! # Drop every subscription alice has
//! pushvault subs delete --owner alice --name ALL --browser ALL
//! ```
//!
//! Storage is configured through `PUSHVAULT_*` environment variables, optionally
//! loaded from a dotenv file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use pushvault_core::{
    connect_backend, PreferencesDocument, Selector, StorageBackend, StoreConfig,
    SubscriptionDocument, WebPushDocument, SENTINEL_ALL,
};
use serde_json::{json, Value};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Application name
pub const APP_NAME: &str = "pushvault";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// CLI
// =============================================================================

/// PushVault - notification subscription storage
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Inspect and modify PushVault subscription storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Load environment variables from this file instead of `.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// User preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Web-push browser registrations
    Webpush {
        #[command(subcommand)]
        action: WebPushAction,
    },
    /// Named subscriptions
    Subs {
        #[command(subcommand)]
        action: SubsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    /// Read one preference set, or all of them
    Get {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = SENTINEL_ALL)]
        name: String,
    },
    /// Store a preference set
    Put {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Preferences as a JSON value
        #[arg(long)]
        preferences: String,
    },
    /// Delete one preference set, or `ALL`
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum WebPushAction {
    /// List one registration, or all of them
    List {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = SENTINEL_ALL)]
        browser: String,
    },
    /// Store (upsert) a registration
    Put {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        browser: String,
        /// `{"apiKeys": {..}, "subscription": {..}}`
        #[arg(long)]
        registration: String,
    },
    /// Update an existing registration
    Update {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        browser: String,
        /// `{"apiKeys": {..}, "subscription": {..}}`
        #[arg(long)]
        registration: String,
    },
    /// Delete one registration, or `ALL`
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        browser: String,
    },
}

#[derive(Subcommand, Debug)]
enum SubsAction {
    /// Every subscription for the owner
    List {
        #[arg(long)]
        owner: String,
    },
    /// One subscription, or all of them
    Get {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = SENTINEL_ALL)]
        name: String,
    },
    /// Attach a browser to a subscription
    Put {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        browser: String,
        #[arg(long)]
        uno: String,
        /// Subscription payload as a JSON value
        #[arg(long)]
        payload: Option<String>,
    },
    /// Detach one browser (or `ALL`) from one subscription (or `ALL`)
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        browser: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_file = load_env_file(cli.env_file.as_deref())?;
    init_tracing(cli.verbose);
    tracing::debug!("{} v{}", APP_NAME, APP_VERSION);
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let config = StoreConfig::from_env().context("loading storage configuration")?;
    let backend = connect_backend(&config)
        .await
        .context("connecting storage backend")?;

    let result = run(&backend, cli.command).await;
    backend.disconnect().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();
}

/// An explicit file must exist; the default `.env` is optional.
fn load_env_file(path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading environment file {}", path.display()))?;
            Ok(Some(path.to_path_buf()))
        }
        None => Ok(dotenvy::dotenv().ok()),
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run<B: StorageBackend>(backend: &B, command: Commands) -> anyhow::Result<Value> {
    let output = match command {
        Commands::Prefs { action } => match action {
            PrefsAction::Get { owner, name } => {
                let prefs = backend
                    .get_user_preferences(&owner, &Selector::from(name))
                    .await?;
                serde_json::to_value(prefs)?
            }
            PrefsAction::Put {
                owner,
                name,
                preferences,
            } => {
                let preferences = parse_json("--preferences", &preferences)?;
                let doc = PreferencesDocument::new(owner, name, preferences);
                serde_json::to_value(backend.store_user_preferences(&doc).await?)?
            }
            PrefsAction::Delete { owner, name } => {
                let deleted = backend
                    .delete_user_preferences(&owner, &Selector::from(name))
                    .await?;
                json!({ "deleted": deleted })
            }
        },
        Commands::Webpush { action } => match action {
            WebPushAction::List { owner, browser } => {
                let registrations = backend
                    .find_push_registrations(&owner, &Selector::from(browser))
                    .await?;
                serde_json::to_value(registrations)?
            }
            WebPushAction::Put {
                owner,
                browser,
                registration,
            } => {
                let doc = web_push_document(owner, browser, &registration)?;
                serde_json::to_value(backend.store_web_push_registration(&doc).await?)?
            }
            WebPushAction::Update {
                owner,
                browser,
                registration,
            } => {
                let doc = web_push_document(owner, browser, &registration)?;
                serde_json::to_value(backend.update_web_push_registration(&doc).await?)?
            }
            WebPushAction::Delete { owner, browser } => {
                let deleted = backend
                    .delete_web_push_registrations(&owner, &Selector::from(browser))
                    .await?;
                json!({ "deleted": deleted })
            }
        },
        Commands::Subs { action } => match action {
            SubsAction::List { owner } => {
                serde_json::to_value(backend.get_subscriptions(&owner).await?)?
            }
            SubsAction::Get { owner, name } => {
                let subs = backend
                    .get_subscription(&owner, &Selector::from(name))
                    .await?;
                serde_json::to_value(subs)?
            }
            SubsAction::Put {
                owner,
                name,
                browser,
                uno,
                payload,
            } => {
                let mut doc = SubscriptionDocument::new(owner, name, uno, browser);
                if let Some(payload) = payload {
                    doc = doc.with_subscription(parse_json("--payload", &payload)?);
                }
                serde_json::to_value(backend.store_subscription(&doc).await?)?
            }
            SubsAction::Delete {
                owner,
                name,
                browser,
            } => serde_json::to_value(
                backend
                    .delete_subscription(&owner, &Selector::from(name), &Selector::from(browser))
                    .await?
            )?,
        },
    };
    Ok(output)
}

fn parse_json(flag: &str, raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn web_push_document(owner: String, browser: String, raw: &str) -> anyhow::Result<WebPushDocument> {
    let mut body = match parse_json("--registration", raw)? {
        Value::Object(body) => body,
        _ => anyhow::bail!("--registration must be a JSON object"),
    };
    body.insert("owner".to_string(), Value::String(owner));
    body.insert("browserID".to_string(), Value::String(browser));
    serde_json::from_value(Value::Object(body))
        .context("--registration must contain apiKeys and subscription")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pushvault_core::{ErrorKind, StorageError};

    use super::*;

    const REGISTRATION: &str = r#"{
        "apiKeys": {"publicKey": "BPub", "privateKey": "priv"},
        "subscription": {"endpoint": "https://push.example/1", "keys": {"auth": "a", "p256dh": "p"}}
    }"#;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec![APP_NAME];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    async fn backend() -> pushvault_core::Backend {
        connect_backend(&StoreConfig::in_memory(false)).await.unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_get_defaults_to_all() {
        let command = parse(&["subs", "get", "--owner", "alice"]);
        assert!(matches!(
            command,
            Commands::Subs {
                action: SubsAction::Get { ref name, .. }
            } if name == SENTINEL_ALL
        ));
    }

    #[test]
    fn test_delete_requires_explicit_selector() {
        let argv = [APP_NAME, "subs", "delete", "--owner", "alice", "--name", "news"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from([APP_NAME, "subs", "list", "--owner", "alice", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_registration_parsing() {
        let doc = web_push_document("alice".to_string(), "B1".to_string(), REGISTRATION).unwrap();
        assert_eq!(doc.browser_id, "B1");
        assert_eq!(doc.api_keys.public_key, "BPub");

        assert!(web_push_document("alice".to_string(), "B1".to_string(), "[]").is_err());
        let partial = r#"{"apiKeys": {}}"#;
        assert!(web_push_document("alice".to_string(), "B1".to_string(), partial).is_err());
    }

    #[tokio::test]
    async fn test_subscription_commands() {
        let backend = backend().await;

        for browser in ["B1", "B2"] {
            run(
                &backend,
                parse(&[
                    "subs",
                    "put",
                    "--owner",
                    "alice",
                    "--name",
                    "market-news",
                    "--browser",
                    browser,
                    "--uno",
                    "U1",
                    "--payload",
                    r#"{"topics": ["fx"]}"#,
                ]),
            )
            .await
            .unwrap();
        }

        let output = run(
            &backend,
            parse(&["subs", "get", "--owner", "alice", "--name", "market-news"]),
        )
        .await
        .unwrap();
        assert_eq!(output[0]["browserID"], json!(["B1", "B2"]));
        assert_eq!(output[0]["subscription"]["topics"], json!(["fx"]));

        let output = run(
            &backend,
            parse(&[
                "subs",
                "delete",
                "--owner",
                "alice",
                "--name",
                "market-news",
                "--browser",
                "B1",
            ]),
        )
        .await
        .unwrap();
        assert_eq!(output, json!([{"name": "market-news", "remaining": ["B2"]}]));
    }

    #[tokio::test]
    async fn test_web_push_and_prefs_commands() {
        let backend = backend().await;

        run(
            &backend,
            parse(&[
                "webpush",
                "put",
                "--owner",
                "alice",
                "--browser",
                "B1",
                "--registration",
                REGISTRATION,
            ]),
        )
        .await
        .unwrap();
        let output = run(&backend, parse(&["webpush", "list", "--owner", "alice"]))
            .await
            .unwrap();
        assert_eq!(output[0]["apiKeys"]["publicKey"], json!("BPub"));

        run(
            &backend,
            parse(&[
                "prefs",
                "put",
                "--owner",
                "alice",
                "--name",
                "default",
                "--preferences",
                r#"{"lang": "en"}"#,
            ]),
        )
        .await
        .unwrap();
        let output = run(&backend, parse(&["prefs", "delete", "--owner", "alice", "--name", "ALL"]))
            .await
            .unwrap();
        assert_eq!(output, json!({"deleted": 1}));
    }

    #[tokio::test]
    async fn test_not_found_surfaces_as_storage_error() {
        let backend = backend().await;
        let err = run(&backend, parse(&["subs", "get", "--owner", "alice", "--name", "missing"]))
            .await
            .unwrap_err();
        let storage = err.downcast_ref::<StorageError>().unwrap();
        assert_eq!(storage.kind(), ErrorKind::NotFound);
    }
}
