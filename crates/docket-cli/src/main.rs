//! Docket CLI: operate document collections and storage quotas.
//!
//! Configuration comes from the environment (a `.env` file is honoured). Results are
//! printed as JSON on stdout; logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use docket_cli::{collection_key, parse_byte_size, AppContext};
use docket_core::models::{Category, ConfirmedUpload, NewFile, OwnerRef, Plan, UploadGrantRequest};
use docket_core::validation::parse_slot_index;
use docket_core::{AppError, Config};
use docket_infra::{init_telemetry, log_app_error, shutdown_telemetry, ErrorResponse, LogFormat};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "docket", about = "Docket document storage CLI")]
struct Cli {
    /// Log format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(flatten)]
    Service(ServiceCommands),
}

/// Commands that need the full service graph.
#[derive(Subcommand)]
enum ServiceCommands {
    /// Quota account operations
    Quota {
        #[command(subcommand)]
        sub: QuotaCommands,
    },
    /// Authorize a direct upload and print the signed PUT URL
    Grant {
        tenant_id: Uuid,
        category: String,
        /// Owner reference: S_<id> or T_<id>
        #[arg(long)]
        owner: Option<String>,
        /// Declared size, e.g. 512, 20MiB
        #[arg(long, value_parser = parse_byte_size)]
        size: u64,
        #[arg(long)]
        content_type: String,
        #[arg(long)]
        filename: String,
    },
    /// Record an uploaded object in a collection
    Confirm {
        tenant_id: Uuid,
        category: String,
        #[arg(long)]
        owner: Option<String>,
        /// Write at this slot instead of appending
        #[arg(long, allow_negative_numbers = true)]
        index: Option<i64>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        year: Option<String>,
        /// Storage key from the upload grant; omit with --index for a metadata-only edit
        #[arg(long)]
        key: Option<String>,
        #[arg(long, value_parser = parse_byte_size)]
        size: Option<u64>,
    },
    /// Remove the slot at an index and delete its object
    Remove {
        tenant_id: Uuid,
        category: String,
        #[arg(allow_negative_numbers = true)]
        index: i64,
        #[arg(long)]
        owner: Option<String>,
    },
    /// List collections of a tenant
    List {
        tenant_id: Uuid,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show one collection with view URLs resolved
    Show {
        tenant_id: Uuid,
        category: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print a download URL that saves the object under a filename
    DownloadUrl {
        storage_key: String,
        #[arg(long)]
        filename: String,
    },
    /// Run background maintenance (usage reconciliation, URL sweep) until interrupted
    Maintain,
}

#[derive(Subcommand)]
enum QuotaCommands {
    /// Show a tenant's quota account
    Show { tenant_id: Uuid },
    /// Create an account if it does not exist yet
    Open {
        tenant_id: Uuid,
        #[arg(long, value_parser = parse_byte_size)]
        total: u64,
    },
    /// Overwrite a tenant's ceiling
    SetTotal {
        tenant_id: Uuid,
        #[arg(long, value_parser = parse_byte_size)]
        total: u64,
    },
    /// Assign a named plan
    AssignPlan {
        tenant_id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_byte_size)]
        total: u64,
    },
    /// Recompute usage from the object store (all tenants when omitted)
    Reconcile {
        #[arg(long)]
        tenant_id: Option<Uuid>,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_telemetry("docket", config.environment(), cli.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    let result = run(cli.command, config).await;
    shutdown_telemetry().await;

    match result {
        Ok(()) => Ok(()),
        Err(CliError::App(err)) => {
            log_app_error(&err);
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&ErrorResponse::from_app_error(&err))
                    .unwrap_or_else(|_| err.to_string())
            );
            std::process::exit(1);
        }
        Err(CliError::Other(err)) => Err(err),
    }
}

enum CliError {
    App(AppError),
    Other(anyhow::Error),
}

impl From<AppError> for CliError {
    fn from(err: AppError) -> Self {
        CliError::App(err)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

async fn run(command: Commands, config: Config) -> Result<(), CliError> {
    match command {
        Commands::Migrate => {
            docket_db::connect_and_migrate(&config).await?;
            print_json(&serde_json::json!({ "success": true, "message": "Migrations applied" }))?;
            Ok(())
        }
        Commands::Service(command) => {
            let ctx = AppContext::from_config(config).await?;
            run_service(&ctx, command).await
        }
    }
}

async fn run_service(ctx: &AppContext, command: ServiceCommands) -> Result<(), CliError> {
    match command {
        ServiceCommands::Quota { sub } => run_quota(ctx, sub).await?,
        ServiceCommands::Grant {
            tenant_id,
            category,
            owner,
            size,
            content_type,
            filename,
        } => {
            let key = collection_key(tenant_id, &category, owner.as_deref())?;
            let grant = ctx
                .uploads
                .grant(UploadGrantRequest {
                    tenant_id,
                    category: key.category,
                    owner_ref: key.owner_ref,
                    declared_size_bytes: size,
                    declared_content_type: content_type,
                    logical_filename: filename,
                })
                .await?;
            print_json(&grant)?;
        }
        ServiceCommands::Confirm {
            tenant_id,
            category,
            owner,
            index,
            title,
            year,
            key: storage_key,
            size,
        } => {
            let key = collection_key(tenant_id, &category, owner.as_deref())?;
            let new_file = match (storage_key, size) {
                (Some(storage_key), Some(size_bytes)) => Some(NewFile {
                    storage_key,
                    size_bytes,
                }),
                (None, None) => None,
                _ => {
                    return Err(AppError::Validation(
                        "--key and --size must be given together".to_string(),
                    )
                    .into())
                }
            };

            match index {
                Some(raw) => {
                    let index = parse_slot_index(raw)?;
                    let replaced = ctx
                        .documents
                        .confirm_at_index(&key, index, title, year, new_file)
                        .await?;
                    print_json(&serde_json::json!({ "index": index, "replaced": replaced }))?;
                }
                None => {
                    let file = new_file.ok_or_else(|| {
                        AppError::Validation("Appending requires --key and --size".to_string())
                    })?;
                    let collection = ctx
                        .documents
                        .confirm_append(
                            &key,
                            ConfirmedUpload {
                                title,
                                year,
                                storage_key: file.storage_key,
                                size_bytes: file.size_bytes,
                            },
                        )
                        .await?;
                    print_json(&collection)?;
                }
            }
        }
        ServiceCommands::Remove {
            tenant_id,
            category,
            index,
            owner,
        } => {
            let key = collection_key(tenant_id, &category, owner.as_deref())?;
            let index = parse_slot_index(index)?;
            let removed = ctx.documents.remove(&key, index).await?;
            print_json(&serde_json::json!({ "index": index, "removed": removed }))?;
        }
        ServiceCommands::List {
            tenant_id,
            category,
            owner,
        } => {
            let category = category
                .as_deref()
                .map(str::parse::<Category>)
                .transpose()?;
            let owner = owner
                .as_deref()
                .map(str::parse::<OwnerRef>)
                .transpose()?;
            let collections = ctx
                .ledger
                .fetch_all(tenant_id, category.as_ref(), owner.as_ref())
                .await?;
            print_json(&collections)?;
        }
        ServiceCommands::Show {
            tenant_id,
            category,
            owner,
        } => {
            let key = collection_key(tenant_id, &category, owner.as_deref())?;
            let views = ctx.documents.list_with_urls(&key).await?;
            print_json(&views)?;
        }
        ServiceCommands::DownloadUrl {
            storage_key,
            filename,
        } => {
            let url = ctx.documents.download_url(&storage_key, &filename).await?;
            print_json(&serde_json::json!({ "download_url": url }))?;
        }
        ServiceCommands::Maintain => {
            let handles = ctx.start_background_tasks();
            if handles.is_empty() {
                tracing::warn!("No background tasks enabled; exiting");
                return Ok(());
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping background tasks");
            for handle in handles {
                handle.abort();
            }
        }
    }

    Ok(())
}

async fn run_quota(ctx: &AppContext, command: QuotaCommands) -> Result<(), CliError> {
    match command {
        QuotaCommands::Show { tenant_id } => {
            let account = ctx.quota.get(tenant_id).await?;
            print_json(&serde_json::json!({
                "account": account,
                "remaining_bytes": account.remaining_bytes(),
            }))?;
        }
        QuotaCommands::Open { tenant_id, total } => {
            print_json(&ctx.quota.open_account(tenant_id, total).await?)?;
        }
        QuotaCommands::SetTotal { tenant_id, total } => {
            print_json(&ctx.quota.set_total(tenant_id, total).await?)?;
        }
        QuotaCommands::AssignPlan {
            tenant_id,
            name,
            total,
        } => {
            let plan = Plan::new(name, total);
            print_json(&ctx.quota.assign_plan(tenant_id, &plan).await?)?;
        }
        QuotaCommands::Reconcile { tenant_id } => match tenant_id {
            Some(tenant_id) => print_json(&ctx.quota.reconcile(tenant_id).await?)?,
            None => print_json(&ctx.quota.reconcile_all().await?)?,
        },
    }
    Ok(())
}
