// Copyright 2026 Facteur Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use facteur::config::SelectorConfig;
use facteur::expense::watcher::{run_autofill_watch, AutofillGuard, RouteWatcher};
use facteur::page::chromium::{find_chromium, ChromiumBrowser};
use facteur::page::PageDriver;
use facteur::protocol::{handle_action, ActionPayload, ActionRequest, ProviderId};

#[derive(Parser)]
#[command(
    name = "facteur",
    about = "Facteur — browser automation for invoice retrieval and expense entry",
    version,
    after_help = "Run 'facteur <command> --help' for details on each command."
)]
struct Cli {
    /// Emit logs as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single action against a browser tab and print the result
    Act {
        /// Action kind, e.g. CHECK_PROVIDER_SESSION or DOWNLOAD_AND_EXTRACT_BILL
        #[arg(long)]
        action: String,

        /// JSON payload for the action
        #[arg(long, default_value = "{}")]
        payload: String,

        /// DevTools websocket URL of a running browser to attach to.
        /// Launches a fresh browser when omitted.
        #[arg(long)]
        ws: Option<String>,

        /// Selector config file overriding the built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Watch the expense tool and autofill the composer whenever its
    /// transaction route appears
    WatchExpense {
        /// DevTools websocket URL of a running browser to attach to
        #[arg(long)]
        ws: Option<String>,

        /// Selector config file overriding the built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check that a Chromium binary can be found
    Doctor,
}

fn init_tracing(json: bool, verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" }));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SelectorConfig> {
    match path {
        Some(path) => SelectorConfig::load(path),
        None => Ok(SelectorConfig::default()),
    }
}

async fn open_browser(ws: Option<&str>) -> Result<ChromiumBrowser> {
    match ws {
        Some(ws) => ChromiumBrowser::connect(ws).await,
        None => ChromiumBrowser::launch().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.verbose);

    match cli.command {
        Command::Act {
            action,
            payload,
            ws,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let payload: ActionPayload = serde_json::from_str(&payload)?;
            let provider = ProviderId::parse(payload.provider.as_deref());
            let request = ActionRequest { action, payload };

            let browser = open_browser(ws.as_deref()).await?;
            let page = browser.page(provider.host_hint()).await?;

            let response = handle_action(&page, &config, &request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::WatchExpense { ws, config } => {
            let config = load_config(config.as_ref())?;
            let browser = open_browser(ws.as_deref()).await?;
            let page: Arc<dyn PageDriver> = Arc::new(browser.page(Some("navan.com")).await?);

            let watcher = RouteWatcher::spawn(Arc::clone(&page), Duration::from_millis(500));
            let guard = Arc::new(AutofillGuard::new());
            tracing::info!("watching for the transaction composer route; Ctrl-C to stop");

            tokio::select! {
                _ = run_autofill_watch(page, config, guard, watcher.subscribe()) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("stopping watcher");
                }
            }
            watcher.shutdown();
        }

        Command::Doctor => match find_chromium() {
            Some(path) => println!("chromium: {}", path.display()),
            None => {
                println!("chromium: not found (set FACTEUR_CHROMIUM_PATH or install Chrome)");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
