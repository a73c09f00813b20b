#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionkit::config::Config;
use sessionkit::providers::{list_providers, registry, GcPolicy};
use sessionkit::session::{redact, Manager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// `sessionkit` - inspect and maintain session storage backends.
#[derive(Parser, Debug)]
#[command(name = "sessionkit")]
#[command(version)]
#[command(about = "Session storage maintenance tool.", long_about = None)]
struct Cli {
    /// Config file (default: $SESSIONKIT_CONFIG or ~/.sessionkit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the effective session configuration
    Status,

    /// List available session backends
    Providers,

    /// Print the number of stored sessions
    Count,

    /// Sweep expired sessions
    #[command(long_about = "\
Sweep expired sessions.

Runs a single garbage-collection pass against the configured backend. \
With --watch, keeps sweeping every gc_lifetime seconds until Ctrl-C.

Examples:
  sessionkit gc
  sessionkit gc --watch")]
    Gc {
        /// Keep running until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Destroy one session
    Destroy {
        /// Session id
        sid: String,
    },

    /// Print the contents of one session
    Show {
        /// Session id
        sid: String,
    },
}

async fn build_manager(config: &Config) -> Result<Manager> {
    Manager::new(&config.session.provider, config.session.manager.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to initialize session provider {:?}",
                config.session.provider
            )
        })
}

fn policy_label(policy: GcPolicy) -> &'static str {
    match policy {
        GcPolicy::Sweep => "sweep",
        GcPolicy::ServerTtl => "server-ttl",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::load_or_init(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Status => {
            let s = &config.session;
            let policy = registry::global().lookup(&s.provider)?.gc_policy();
            println!("Config:          {}", config.config_path.display());
            println!("Provider:        {}", s.provider);
            println!("Provider config: {}", s.manager.provider_config);
            println!("GC policy:       {}", policy_label(policy));
            println!("Max lifetime:    {}s", s.manager.max_lifetime);
            println!("GC interval:     {}s", s.manager.gc_lifetime);
            println!("Cookie name:     {}", s.manager.cookie_name);
            println!(
                "Id transports:   cookie{}{}",
                if s.manager.enable_sid_in_url_query { ", query" } else { "" },
                if s.manager.enable_sid_in_http_header {
                    format!(", header {}", s.manager.session_name_in_http_header)
                } else {
                    String::new()
                }
            );
            Ok(())
        }

        Commands::Providers => {
            let registered = registry::global().names();
            for info in list_providers() {
                let marker = if info.available { "" } else { " (not built)" };
                println!(
                    "{:<8} {:<11} {}{marker}",
                    info.name,
                    policy_label(info.gc_policy),
                    info.description
                );
                if !info.config_example.is_empty() {
                    println!("{:<21}e.g. {}", "", info.config_example);
                }
            }
            for name in registered
                .iter()
                .filter(|n| list_providers().iter().all(|i| i.name != n.as_str()))
            {
                println!("{name:<8} (custom)");
            }
            Ok(())
        }

        Commands::Count => {
            let manager = build_manager(&config).await?;
            let count = manager.active_session_count().await?;
            if manager.gc_policy() == GcPolicy::ServerTtl {
                println!("{count} (backend does not support counting)");
            } else {
                println!("{count}");
            }
            Ok(())
        }

        Commands::Gc { watch: keep_running } => {
            let manager = Arc::new(build_manager(&config).await?);
            if !keep_running {
                manager.gc().await;
                info!("Session GC pass complete");
                return Ok(());
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let gc_task = tokio::spawn({
                let manager = Arc::clone(&manager);
                async move { manager.gc_loop(shutdown_rx).await }
            });

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
            gc_task.await.context("GC loop task failed")?;
            Ok(())
        }

        Commands::Destroy { sid } => {
            let manager = build_manager(&config).await?;
            manager
                .provider()
                .destroy(&sid)
                .await
                .with_context(|| format!("Failed to destroy session {}", redact(&sid)))?;
            println!("Destroyed {}", redact(&sid));
            Ok(())
        }

        Commands::Show { sid } => {
            let manager = build_manager(&config).await?;
            if !manager.provider().exists(&sid).await? {
                println!("No live session {}", redact(&sid));
                return Ok(());
            }
            let store = manager.get_session_store(&sid).await?;
            let mut entries: Vec<_> = store.snapshot().into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            if entries.is_empty() {
                println!("(empty)");
            }
            for (key, value) in entries {
                println!("{key} = {value}");
            }
            Ok(())
        }
    }
}
