//! IAM Sync
//!
//! Moves IAM policies, roles, groups and instance profiles between the
//! production and development AWS accounts through JSON state files.
//!
//! # Usage
//! ```bash
//! # Capture the current account into config/iam/
//! iam-sync -a creds.json --production-account 222222222222 \
//!     --development-account 111111111111 export
//!
//! # Converge production onto the files, previewing first
//! iam-sync -a creds.json --production-account 222222222222 import --assume-role --dry-run
//!
//! # Dump the raw authorization details
//! iam-sync -a creds.json --production-account 222222222222 details --output details.json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use iam_sync::confirm::confirm_stdin;
use iam_sync::{
    capture, delete_all_policies, AwsCredentials, AwsIamApi, EntityKind, Extractor, IamApi,
    Reconciler, StateStore, SyncAction, SyncConfig, SyncResult,
};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "iam-sync")]
#[command(about = "Export and reconcile IAM entities between AWS accounts", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON file with aws_access_key and aws_secret_key
    #[arg(short = 'a', long, env = "AWS_CREDENTIALS")]
    aws_credentials: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, env = "IAM_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Production account id
    #[arg(long, env = "IAM_SYNC_PRODUCTION_ACCOUNT")]
    production_account: Option<String>,

    /// Development account id
    #[arg(long, env = "IAM_SYNC_DEVELOPMENT_ACCOUNT")]
    development_account: Option<String>,

    /// Directory holding the state files
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// AWS region for API calls
    #[arg(long)]
    region: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the current account into the state files
    Export,

    /// Converge an account onto the state files
    Import {
        /// Assume the cross-account role and import into production
        #[arg(long)]
        assume_role: bool,

        /// Report planned changes without making them
        #[arg(long)]
        dry_run: bool,

        /// Reconcile a single entity kind
        #[arg(long, value_enum)]
        only: Option<EntityKind>,
    },

    /// Write the raw authorization details of the current account
    Details {
        /// Output file
        #[arg(long, default_value = "iam_details.json")]
        output: PathBuf,
    },

    /// Delete every customer managed policy after typed confirmation
    DeleteAllPolicies {
        /// Assume the cross-account role and delete in production
        #[arg(long)]
        assume_role: bool,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json)?;

    let config = load_config(&cli)?;
    let credentials = AwsCredentials::load(cli.aws_credentials.as_deref())
        .context("Failed to load AWS credentials")?;

    info!("Connecting to AWS ({})", config.region);
    let api = AwsIamApi::connect(&credentials, &config.region).await;

    match cli.command {
        Commands::Export => export(&api, &config).await?,

        Commands::Import {
            assume_role,
            dry_run,
            only,
        } => {
            let api = if assume_role {
                elevate(&api, &config).await?
            } else {
                api
            };
            import(&api, &config, dry_run, only).await?;
        }

        Commands::Details { output } => {
            let snapshot = capture(&api)
                .await
                .context("Failed to fetch account authorization details")?;
            let text = serde_json::to_string_pretty(&snapshot)?;
            std::fs::write(&output, text)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Saved authorization details to {}", output.display());
        }

        Commands::DeleteAllPolicies { assume_role } => {
            let api = if assume_role {
                elevate(&api, &config).await?
            } else {
                api
            };
            let results = delete_all_policies(&api, confirm_stdin).await?;
            print_summary(&results);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// File settings with CLI overrides applied on top
fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(account) = &cli.production_account {
        config.production_account = account.clone();
    }
    if let Some(account) = &cli.development_account {
        config.development_account = account.clone();
    }
    if let Some(dir) = &cli.config_dir {
        config.config_dir = dir.clone();
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn elevate(api: &AwsIamApi, config: &SyncConfig) -> Result<AwsIamApi> {
    let role_arn = config.cross_account_role_arn();
    info!("Assuming {}", role_arn);
    api.assume_role(&role_arn, &config.session_name)
        .await
        .with_context(|| format!("Failed to assume {}", role_arn))
}

async fn export(api: &AwsIamApi, config: &SyncConfig) -> Result<()> {
    let account = api.account_id().await.context("Failed to identify the current account")?;
    info!("Exporting IAM state of account {}", account);

    let snapshot = capture(api)
        .await
        .context("Failed to fetch account authorization details")?;
    let session = Extractor::new(&config.filters, config.document_format).extract(&snapshot)?;

    let session = match config.accounts().export_translator(&account) {
        Some(translator) => {
            info!(
                "Translating account ids {} -> {}",
                translator.from_account(),
                translator.to_account()
            );
            translator.translate_session(&session)
        }
        None => {
            warn!("No account pair to translate toward, saving ids unchanged");
            session
        }
    };

    let store = StateStore::new(&config.config_dir, config.sort_keys);
    store.save_session(&session)?;

    for kind in EntityKind::ALL {
        println!("{:<24} {:>5}", kind.to_string(), session.count(kind));
    }
    info!("Saved IAM state of {} to {}", account, store.dir().display());
    Ok(())
}

async fn import(
    api: &AwsIamApi,
    config: &SyncConfig,
    dry_run: bool,
    only: Option<EntityKind>,
) -> Result<()> {
    let target = api.account_id().await.context("Failed to identify the target account")?;
    info!("Importing IAM state into account {}", target);

    let store = StateStore::new(&config.config_dir, config.sort_keys);
    let session = store.load_session()?;
    if session.is_empty() {
        warn!("No state files found in {}", store.dir().display());
    }
    let session = match config.accounts().import_translator(&target) {
        Some(translator) => {
            info!(
                "Translating account ids {} -> {}",
                translator.from_account(),
                translator.to_account()
            );
            translator.translate_session(&session)
        }
        None => {
            warn!("No account pair to translate from, importing ids unchanged");
            session
        }
    };

    let mut reconciler = Reconciler::new(api, config.strategies).dry_run(dry_run);
    reconciler
        .refresh()
        .await
        .context("Failed to fetch target account details")?;

    let results = match only {
        Some(kind) => reconciler.reconcile_kind(kind, &session).await?,
        None => reconciler.reconcile_all(&session).await?,
    };
    print_summary(&results);

    let failed = results.iter().filter(|r| !r.success()).count();
    if failed > 0 {
        warn!("{} entities failed to reconcile", failed);
    }
    Ok(())
}

fn print_summary(results: &[SyncResult]) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        *counts.entry(result.action.to_string()).or_default() += 1;
    }

    println!("\n{:<12} {:>6}", "ACTION", "COUNT");
    println!("{}", "-".repeat(19));
    for (action, count) in &counts {
        println!("{:<12} {:>6}", action, count);
    }

    for result in results.iter().filter(|r| r.action == SyncAction::Error) {
        println!(
            "FAILED {} {}: {}",
            result.kind,
            result.name,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}
