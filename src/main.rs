//! Taskboard Push CLI - inspect keys and rehearse the push lifecycle.
//!
//! This is the main binary entry point. See the `taskboard_push` library
//! for the core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use p256::elliptic_curve::rand_core::OsRng;
use p256::SecretKey;
use taskboard_push::env::Environment;
use taskboard_push::host::memory::{MemoryHost, PromptBehavior};
use taskboard_push::host::HostPermission;
use taskboard_push::{
    ApplicationServerKey, HostBindings, HostCapabilities, NotificationOptions, PushConfig,
    PushCoordinator,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "taskboard-push")]
#[command(version)]
#[command(about = "Push notification lifecycle tools for the task dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an application server key and check it is a P-256 point
    Decode {
        /// Unpadded base64url key; defaults to the configured key
        key: Option<String>,
    },
    /// Run the full lifecycle against an in-memory host
    Simulate {
        /// Have the simulated user deny the permission prompt
        #[arg(long)]
        deny: bool,
        /// Title of the notification shown after subscribing
        #[arg(long, default_value = "Task assigned to you")]
        title: String,
    },
    /// Print the effective configuration
    Config,
}

fn decode(key: Option<String>) -> Result<()> {
    let key = match key {
        Some(key) => key,
        None => PushConfig::load()?
            .resolve_server_key(Environment::current())
            .context("No key given and none configured")?,
    };
    let decoded = ApplicationServerKey::from_base64url(&key)
        .with_context(|| format!("Failed to decode {} character key", key.len()))?;

    let summary = serde_json::json!({
        "length": decoded.len(),
        "uncompressed_prefix": decoded.as_bytes().first() == Some(&0x04),
        "p256_point": decoded.is_p256_point(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn simulate(deny: bool, title: &str) -> Result<()> {
    let mut config = PushConfig::load()?;
    if config.application_server_key.is_none() {
        let server_key = SecretKey::random(&mut OsRng).public_key();
        config.application_server_key = Some(BASE64URL.encode(server_key.to_sec1_bytes()));
        log::info!("[Push] Using a generated server key for the simulation");
    }

    let host = Arc::new(MemoryHost::new());
    if deny {
        host.set_prompt(PromptBehavior::Answer(HostPermission::Denied));
    }
    let coordinator = PushCoordinator::with_environment(
        config,
        HostBindings::from_host(&host, HostCapabilities::full()),
        Environment::current(),
    )?;

    let outcome = match coordinator.enable().await {
        Ok(subscription) => {
            let notification = coordinator
                .show(title, NotificationOptions::default())
                .await?;
            serde_json::json!({
                "state": coordinator.state(),
                "subscription": subscription.to_json(),
                "notification": notification,
            })
        }
        Err(e) => serde_json::json!({
            "state": coordinator.state(),
            "error": e.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let calls = host.calls();
    log::info!("[Push] Host primitives invoked: {}", calls.total());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { key } => decode(key)?,
        Commands::Simulate { deny, title } => simulate(deny, &title).await?,
        Commands::Config => {
            let config = PushConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
