//! Homestead CLI
//!
//! Command-line interface for provisioning and operating self-hosted
//! infrastructure components on a Kubernetes cluster.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use homestead::config::AppConfig;
use homestead::modules::{self, Context};
use homestead::rollout::RolloutOp;

#[derive(Parser)]
#[command(author, version, about = "Self-hosted infrastructure on Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the homestead configuration file
    #[arg(short, long, default_value = "homestead.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a module's manifests locally without touching the cluster
    Generate {
        /// Module name (postgres, redis, pgadmin)
        module: String,
    },
    /// Create a module's resources on the cluster
    Apply {
        module: String,
    },
    /// Delete a module's resources, skipping any already gone
    Clean {
        module: String,
    },
    /// Report the state of a module's resources
    Status {
        module: String,
    },
    /// Back up a stateful module's data
    Backup {
        module: String,
        /// Destination directory overriding the configured backup root
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List recorded backups for a module, newest first
    Backups {
        module: String,
    },
    /// Restore a stateful module from a backup
    Restore {
        module: String,
        /// Backup timestamp (YYYYMMDD_HHMMSS) or `latest`
        target: String,
    },
    /// Create a database and its owning role on postgres
    AddDb {
        name: String,
        user: String,
        password: String,
    },
    /// Drop a database and its owning role on postgres
    RemoveDb {
        name: String,
        user: String,
    },
    /// Rollout control for a module's deployment
    Rollout {
        module: String,
        /// One of restart, status, history, undo
        op: String,
    },
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    let _guard = config.logging.init()?;
    let ctx = Context::new(config);

    if let Err(e) = run(cli.command, &ctx).await {
        print_error(&e.to_string());
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, ctx: &Context) -> homestead::Result<()> {
    match command {
        Commands::Generate { module } => {
            modules::base(&module)?.generate(ctx).await?;
            print_success(&format!(
                "manifests for {} written to {}",
                module,
                ctx.config.paths.configs_root.join(&module).display()
            ));
        }
        Commands::Apply { module } => {
            modules::base(&module)?.apply(ctx).await?;
            print_success(&format!("module {module} applied"));
        }
        Commands::Clean { module } => {
            modules::base(&module)?.clean(ctx).await?;
            print_success(&format!("module {module} cleaned"));
        }
        Commands::Status { module } => {
            for line in modules::base(&module)?.status(ctx).await? {
                println!("{line}");
            }
        }
        Commands::Backup { module, dest } => {
            let manifest = modules::backupable(&module)?.backup(ctx, dest).await?;
            print_success(&format!(
                "backup {} complete: {}",
                manifest.timestamp, manifest.archive
            ));
            println!("  restore with: {}", manifest.restore_command);
        }
        Commands::Backups { module } => {
            let entries = modules::backupable(&module)?.backups(ctx)?;
            if entries.is_empty() {
                println!("no backups recorded for {module}");
            }
            for (timestamp, path) in entries {
                println!("{timestamp}  {}", path.display());
            }
        }
        Commands::Restore { module, target } => {
            modules::restorable(&module)?.restore(ctx, &target).await?;
            print_success(&format!("module {module} restored from {target}"));
        }
        Commands::AddDb {
            name,
            user,
            password,
        } => {
            modules::admin_capable(modules::postgres::NAME)?
                .add_db(ctx, &name, &user, &password)
                .await?;
            print_success(&format!("database {name} ready for user {user}"));
        }
        Commands::RemoveDb { name, user } => {
            modules::admin_capable(modules::postgres::NAME)?
                .remove_db(ctx, &name, &user)
                .await?;
            print_success(&format!("database {name} and user {user} removed"));
        }
        Commands::Rollout { module, op } => {
            let parsed: RolloutOp = op.parse()?;
            let report = modules::rollable(&module)?.rollout(ctx, parsed).await?;
            if let Some(report) = report {
                println!("{report}");
            }
            print_success(&format!("rollout {op} on {module} complete"));
        }
    }

    Ok(())
}
