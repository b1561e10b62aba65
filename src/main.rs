use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::{config, Action, AuthService, EnrollmentRequest, LoginRequest, Pipeline, ServiceError};
use log::{error, info};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Face-embedding login with role-based access control")]
struct Cli {
    /// Config file (defaults to the installed config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding extracted from an image as JSON
    Extract {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Enroll a new identity from a face image
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// admin, manager, staff or user
        #[arg(short, long, default_value = "user")]
        role: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Match a face image and print an access token
    Login {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show the identity a token belongs to
    Whoami {
        #[arg(short, long)]
        token: String,
    },
    /// List enrolled identities (requires manage-users)
    Users {
        #[arg(short, long)]
        token: String,
    },
    /// List the actions a token may perform
    Permissions {
        #[arg(short, long)]
        token: String,
    },
    /// Check a token against one action
    Authorize {
        #[arg(short, long)]
        token: String,
        /// manage-users, view-analytics or access-secure-content
        #[arg(short, long)]
        action: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            err.downcast_ref::<ServiceError>()
                .map(ServiceError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg_path = cli.config.as_deref();
    let cfg = config::load_config(cfg_path)?;
    let pipeline = Pipeline::new(cfg.embedding.grid_size);

    match cli.command {
        Commands::Extract { image } => {
            let embedding = pipeline
                .extract_path(&image)
                .with_context(|| format!("extracting {}", image.display()))?;
            print_json(&embedding.to_vec())
        }
        Commands::Enroll {
            name,
            email,
            role,
            image,
        } => {
            let service = AuthService::from_config(&cfg)?;
            let embedding = pipeline
                .extract_path(&image)
                .with_context(|| format!("extracting {}", image.display()))?;
            let summary = service.enroll(EnrollmentRequest {
                name,
                email,
                role,
                embedding: embedding.to_vec(),
            })?;
            info!("✓ Enrolled {} <{}> as {}", summary.name, summary.email, summary.role);
            print_json(&summary)
        }
        Commands::Login { image } => {
            let service = AuthService::from_config(&cfg)?;
            let embedding = pipeline
                .extract_path(&image)
                .with_context(|| format!("extracting {}", image.display()))?;
            let response = service.login(LoginRequest {
                embedding: embedding.to_vec(),
            })?;
            print_json(&response)
        }
        Commands::Whoami { token } => {
            let service = AuthService::from_config(&cfg)?;
            print_json(&service.me(&token)?)
        }
        Commands::Users { token } => {
            let service = AuthService::from_config(&cfg)?;
            print_json(&service.list_users(&token)?)
        }
        Commands::Permissions { token } => {
            let service = AuthService::from_config(&cfg)?;
            print_json(&service.permissions(&token)?)
        }
        Commands::Authorize { token, action } => {
            let service = AuthService::from_config(&cfg)?;
            let action = action.parse::<Action>().map_err(ServiceError::from)?;
            let principal = service.authorize(&token, action)?;
            info!("✓ {} may {}", principal.role, action);
            print_json(&principal)
        }
        Commands::Config => open_config(cfg_path.unwrap_or(&config::CONFIG_PATH)),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_config(path: &Path) -> Result<()> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", path);

    let status = std::process::Command::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
