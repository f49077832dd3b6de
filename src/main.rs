//! deposit-sentinel - entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Registry │───▶│ Watcher  │───▶│  Ledger  │───▶│  Sweep   │
//! │ (addrs)  │    │(per chain│    │ (exactly │    │ (sponsor │
//! │          │    │  poll)   │    │   once)  │    │   pays)  │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deposit_sentinel::config::AppConfig;
use deposit_sentinel::logging::init_logging;
use deposit_sentinel::service::SentinelService;
use deposit_sentinel::vault::AesGcmVault;
use dotenvy::dotenv;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"),
    about = "Deposit watcher and sponsored sweep engine for Solana and EVM chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch every configured chain and sweep confirmed deposits
    Run {
        /// Loads config/<env>.yaml
        #[arg(long, short, env = "SENTINEL_ENV", default_value = "dev")]
        env: String,
    },
    /// Retry the sweep of one confirmed deposit
    Sweep {
        #[arg(long, short, env = "SENTINEL_ENV", default_value = "dev")]
        env: String,
        #[arg(long)]
        deposit_id: Uuid,
    },
    /// Seal a raw deposit wallet key for the address registry
    EncryptKey {
        #[arg(long, default_value = "VAULT_MASTER_KEY")]
        master_key_env: String,
        /// Raw key bytes as hex
        #[arg(long, env = "SECRET_KEY_HEX", hide_env_values = true)]
        secret_hex: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { env } => {
            let config = AppConfig::load(&env).context("Failed to load config")?;
            let _log_guard = init_logging(&config);
            tracing::info!(
                "Starting deposit-sentinel {} ({}) in {} mode",
                env!("CARGO_PKG_VERSION"),
                env!("GIT_HASH"),
                env
            );

            let service = SentinelService::build(&config)
                .await
                .context("Failed to start service")?;
            service.run().await?;
        }
        Command::Sweep { env, deposit_id } => {
            let config = AppConfig::load(&env).context("Failed to load config")?;
            let _log_guard = init_logging(&config);

            let service = SentinelService::build(&config)
                .await
                .context("Failed to start service")?;
            let receipt = service
                .sweep(deposit_id)
                .await
                .with_context(|| format!("Sweep of deposit {} failed", deposit_id))?;
            println!("swept {} in tx {}", deposit_id, receipt.sweep_tx_id);
            if let Some(funding) = receipt.funding_tx_id {
                println!("gas funded by tx {}", funding);
            }
            println!("sponsor paid {} (native base units)", receipt.gas_spent);
        }
        Command::EncryptKey {
            master_key_env,
            secret_hex,
        } => {
            let vault = AesGcmVault::from_env(&master_key_env)?;
            let secret = hex::decode(secret_hex.trim().trim_start_matches("0x"))
                .context("Secret is not valid hex")?;
            println!("{}", vault.encrypt(&secret)?.0);
        }
    }

    Ok(())
}
