mod config;
mod observability;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use contact_form::delivery::negotiator::AttemptOutcome;
use contact_form::errors::ContactError;
use contact_form::settings::{ContactSettings, SettingsError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "contact-relay", about = "Contact form relay")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the contact endpoint and the admin listener.
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Walk the SMTP fallback ladder with the configured credentials
    /// without sending any mail.
    SmtpCheck {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Observability(#[from] observability::ObservabilityError),
    #[error(transparent)]
    Contact(#[from] ContactError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        CliCommand::Run { config } => Some(config),
        CliCommand::SmtpCheck { config } => config.as_ref(),
    };
    let config = match config_path.map(|path| Config::from_file(path)).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = observability::init_logging(config.common.logging.as_ref());

    let result = match cli.command {
        CliCommand::Run { .. } => run(config),
        CliCommand::SmtpCheck { .. } => smtp_check(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "contact-relay failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<(), CliError> {
    observability::init_metrics(config.common.metrics.as_ref())?;
    let contact_form_config = config
        .contact_form
        .ok_or(ConfigError::MissingSection("contact_form"))?;
    let settings = ContactSettings::from_env()?;

    tracing::info!(
        policy = settings.policy.as_str(),
        dry_run = settings.dry_run,
        "Starting contact form"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(contact_form::run(contact_form_config, settings))?;
    Ok(())
}

fn smtp_check() -> Result<(), CliError> {
    let settings = ContactSettings::from_env()?;
    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(contact_form::smtp_check(settings)) {
        Ok(attempts) => {
            for attempt in &attempts {
                println!("{attempt}");
            }
            if let Some(winner) = attempts
                .iter()
                .find(|a| a.outcome == AttemptOutcome::Success)
            {
                println!("SMTP OK: {} with {}", winner.config, winner.method);
            }
            Ok(())
        }
        Err(ContactError::NegotiationExhausted(exhausted)) => {
            for attempt in &exhausted.attempts {
                println!("{attempt}");
            }
            println!("hint: {}", exhausted.hint);
            Err(ContactError::NegotiationExhausted(exhausted).into())
        }
        Err(e) => Err(e.into()),
    }
}
