use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use crm_inbox::api::ApiServerBuilder;
use crm_inbox::channels::WhatsAppClient;
use crm_inbox::config::{Config, WhatsAppConfig};
use crm_inbox::llm::{AnthropicClient, Unconfigured};
use crm_inbox::pipeline::{Collaborators, InboundPipeline};
use crm_inbox::{db, phone};

/// CRM inbox - inbound `WhatsApp` pipeline with automated replies
#[derive(Parser)]
#[command(name = "crm-inbox", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.config/crm-inbox/config.toml)
    #[arg(short, long, env = "CRM_INBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Print the normalized form of a phone number and whether it is dialable
    NormalizePhone {
        /// Free-form phone number
        raw: String,
        /// Country code for domestic mobile numbers
        #[arg(long, default_value = phone::DEFAULT_COUNTRY_CODE)]
        country_code: String,
    },
    /// Load and validate configuration without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,crm_inbox=info",
        1 => "info,crm_inbox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.config).await,
        Command::NormalizePhone { raw, country_code } => {
            normalize_phone(&raw, &country_code);
            Ok(())
        }
        Command::CheckConfig => check_config(cli.config),
    }
}

async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    let Config {
        server,
        whatsapp,
        llm,
        pipeline: settings,
        timeouts,
    } = config;

    if let Some(parent) = server.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::init(&server.database_path, timeouts.store)?;

    let WhatsAppConfig {
        access_token,
        phone_number_id,
        verify_token,
        graph_url,
    } = whatsapp;
    let whatsapp = Arc::new(WhatsAppClient::new(
        access_token,
        phone_number_id,
        graph_url,
        timeouts.provider,
    )?);

    let collaborators = if let Some(api_key) = llm.api_key {
        let anthropic = Arc::new(AnthropicClient::new(api_key, timeouts.llm)?.with_model(llm.model.clone()));
        Collaborators {
            sender: whatsapp.clone(),
            media: whatsapp,
            completion: anthropic.clone(),
            extraction: anthropic,
        }
    } else {
        tracing::warn!("ANTHROPIC_API_KEY not set - replies fall back to fixed templates");
        Collaborators {
            sender: whatsapp.clone(),
            media: whatsapp,
            completion: Arc::new(Unconfigured),
            extraction: Arc::new(Unconfigured),
        }
    };

    tracing::info!(
        port = server.port,
        database = %server.database_path.display(),
        model = %llm.model,
        auto_response = settings.auto_response,
        "starting crm inbox"
    );

    let pipeline = InboundPipeline::new(pool.clone(), collaborators, settings);

    ApiServerBuilder::new(pool, pipeline, verify_token)
        .api_key(server.api_key)
        .port(server.port)
        .build()
        .run()
        .await?;

    Ok(())
}

fn normalize_phone(raw: &str, country_code: &str) {
    let normalized = phone::normalize_with_country(raw, country_code);
    let validity = if phone::is_valid(&normalized) {
        "valid"
    } else {
        "invalid"
    };
    println!("{normalized} ({validity})");
}

fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    println!("Configuration OK");
    println!("  port:           {}", config.server.port);
    println!("  database:       {}", config.server.database_path.display());
    println!("  review api key: {}", set_or_unset(config.server.api_key.is_some()));
    println!("  graph url:      {}", config.whatsapp.graph_url);
    println!("  phone id:       {}", config.whatsapp.phone_number_id);
    println!(
        "  llm:            {} (api key {})",
        config.llm.model,
        set_or_unset(config.llm.api_key.as_ref().is_some_and(|k| !k.expose_secret().is_empty()))
    );
    println!("  auto response:  {}", config.pipeline.auto_response);
    println!("  country code:   {}", config.pipeline.country_code);
    println!("  history limit:  {}", config.pipeline.history_limit);
    Ok(())
}

const fn set_or_unset(set: bool) -> &'static str {
    if set { "set" } else { "unset" }
}
