//! `ghpe`: obtain and refresh a GitHub App user access token for a Puppet
//! Enterprise machine user.
//!
//! Exit codes: 0 success, 1 unexpected failure, 2 invalid command line,
//! 3 network, 4 token expired or missing, 5 validation failed or rate limited,
//! 6 other GitHub protocol error, 7 credential file, 8 not running as root,
//! 9 authorization response rejected, 10 configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use ghpe_core::auth::{
    utils::mask_secret, AuthError, CredentialRecord, FileCredentialStore, OAuthClient,
    PendingAuthorizationStore, RefreshOutcome, TokenManager, TokenStatus, EXIT_UNEXPECTED,
};
use ghpe_core::config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GitHub App user token lifecycle for Puppet Enterprise")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, global = true, env = "GHPE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the GitHub App authorization URL and remember its state
    #[command(alias = "generate-auth-url")]
    AuthUrl(AuthUrlArgs),
    /// Exchange the authorization code for the initial token pair (requires root)
    ExchangeCode(ExchangeArgs),
    /// Refresh the stored access token (requires root)
    #[command(alias = "refresh-token")]
    Refresh(RefreshArgs),
    /// Ask GitHub whether the stored access token is still valid
    CheckToken(CheckArgs),
    /// Show the stored token expiry without contacting GitHub
    Status,
}

#[derive(Args, Debug)]
struct AuthUrlArgs {
    /// Also open the URL in the system browser
    #[arg(long)]
    open: bool,
}

#[derive(Args, Debug)]
struct ExchangeArgs {
    /// Authorization code, or the full redirect URL containing `code` and `state`
    code: String,
}

#[derive(Args, Debug)]
struct RefreshArgs {
    /// Only refresh when the stored token expires within this many seconds
    #[arg(long = "if-expiring-within", value_name = "SECS")]
    if_expiring_within: Option<u32>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::from(EXIT_UNEXPECTED);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("GHPE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<AuthError>()
                .map(AuthError::exit_code)
                .or_else(|| cause.downcast_ref::<ConfigError>().map(ConfigError::exit_code))
        })
        .unwrap_or(EXIT_UNEXPECTED)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("unable to load configuration from '{}'", cli.config.display()))?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::AuthUrl(args) => auth_url(&config, args),
        Commands::ExchangeCode(args) => exchange_code(&config, args).await,
        Commands::Refresh(args) => refresh(&config, args).await,
        Commands::CheckToken(args) => check_token(&config, args).await,
        Commands::Status => status(&config),
    }
}

fn build_manager(config: &Config) -> Result<TokenManager<FileCredentialStore>> {
    let oauth = OAuthClient::new(config).context("failed to build OAuth client")?;
    let pending = PendingAuthorizationStore::new(config.state_file());
    Ok(TokenManager::new(
        FileCredentialStore::from_config(config),
        oauth,
        pending,
    ))
}

fn auth_url(config: &Config, args: AuthUrlArgs) -> Result<()> {
    let manager = build_manager(config)?;
    let url = match manager.begin_authorization(args.open) {
        Err(AuthError::BrowserLaunch(reason)) => {
            eprintln!("Failed to launch browser ({reason}); open the URL below manually.");
            manager.begin_authorization(false)?
        }
        other => other.context("failed to prepare authorization URL")?,
    };

    println!("Get the GitHub App `code` from the following URL.");
    println!(
        "Note: you may want to use a private/incognito browser session to ensure you are using the correct machine account."
    );
    println!("\n  {url}\n");
    println!("Then run `sudo ghpe exchange-code '<redirect URL>'` within 10 minutes.");
    Ok(())
}

async fn exchange_code(config: &Config, args: ExchangeArgs) -> Result<()> {
    let manager = build_manager(config)?;
    let record = manager
        .complete_authorization(&args.code)
        .await
        .context("failed to exchange authorization code")?;
    println!("Initial credentials stored.");
    print_record(config, &record);
    Ok(())
}

async fn refresh(config: &Config, args: RefreshArgs) -> Result<()> {
    let manager = build_manager(config)?;
    let window = args
        .if_expiring_within
        .map(|secs| Duration::seconds(i64::from(secs)));
    match manager
        .refresh(window)
        .await
        .context("failed to refresh access token")?
    {
        RefreshOutcome::Refreshed(record) => {
            println!("Access token refreshed.");
            print_record(config, &record);
        }
        RefreshOutcome::Skipped(record) => {
            println!(
                "Access token still valid for {}; nothing to do.",
                describe_remaining(&record)
            );
        }
    }
    Ok(())
}

async fn check_token(config: &Config, args: CheckArgs) -> Result<()> {
    let manager = build_manager(config)?;
    let status = manager
        .check_status()
        .await
        .context("failed to check token status")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        render_status(&status);
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let manager = build_manager(config)?;
    let record = manager
        .stored_record()
        .context("failed to read stored credentials")?;
    print_record(config, &record);
    if record.is_expired() {
        println!("Status: expired");
    } else {
        println!("Status: valid for {}", describe_remaining(&record));
    }
    Ok(())
}

fn print_record(config: &Config, record: &CredentialRecord) {
    println!(
        "  Access token:  {} ({})",
        mask_secret(&record.access_token),
        config.token_file.display()
    );
    println!(
        "  Refresh token: {} ({})",
        mask_secret(&record.refresh_token),
        config.refresh_token_file.display()
    );
    match record.expires_at_utc() {
        Some(expiry) => println!(
            "  Expires:       {} [{}] ({})",
            expiry,
            record.expires_at,
            config.token_expiry_file.display()
        ),
        None => println!(
            "  Expires:       {} ({})",
            record.expires_at,
            config.token_expiry_file.display()
        ),
    }
}

fn render_status(status: &TokenStatus) {
    println!("Token is valid.");
    if let Some(login) = status.login() {
        println!("  User:        {login}");
    }
    if let Some(app) = status.app.as_ref().and_then(|app| app.name.as_deref()) {
        println!("  App:         {app}");
    }
    if let Some(last_eight) = &status.token_last_eight {
        println!("  Token:       ...{last_eight}");
    }
    if let Some(scopes) = &status.scopes {
        if !scopes.is_empty() {
            println!("  Scopes:      {}", scopes.join(", "));
        }
    }
    if let Some(expires_at) = status.expires_at {
        println!("  Expires at:  {expires_at}");
    }
    if let Some(updated_at) = status.updated_at {
        println!("  Updated at:  {updated_at}");
    }
}

fn describe_remaining(record: &CredentialRecord) -> String {
    let remaining = record.remaining().max(Duration::zero());
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() - hours * 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
