//! drive-sync: Two-way sync between a local vault and a Google Drive folder.
//!
//! Runs the shared reconciliation core against the native filesystem and the
//! Drive v3 API, either once or continuously in watch mode.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use drive_sync::{Config, DriveClient, FileWatcher, JsonStateStore, NativeFs, OAuthClient};
use drive_sync_core::{
    Credentials, EventBus, StateStore, SyncError, SyncEvent, SyncOrchestrator, Subscription,
};

/// Config directory created inside the vault when none is given
const DEFAULT_CONFIG_DIR: &str = ".drive-sync";

#[derive(Parser, Debug)]
#[command(name = "drive-sync")]
#[command(about = "Sync a vault folder with Google Drive")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: PathBuf,

    /// Directory holding config.json and state.json (defaults to <vault>/.drive-sync)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// OAuth client ID, overriding the config file
    #[arg(long, env = "DRIVE_SYNC_CLIENT_ID")]
    client_id: Option<String>,

    /// OAuth client secret, overriding the config file
    #[arg(long, env = "DRIVE_SYNC_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync and exit
    Sync,
    /// Sync on local changes and on a timer until interrupted
    Watch,
    /// Print the Google consent page URL
    AuthUrl,
    /// Exchange an authorization code for tokens
    Login {
        /// Code shown after granting access on the consent page
        #[arg(long)]
        code: String,
    },
    /// Forget the stored tokens
    Logout,
    /// Show pairing and last sync information
    Status,
}

type Drive = DriveClient<Arc<JsonStateStore>>;
type Orchestrator = SyncOrchestrator<NativeFs, Drive, Arc<JsonStateStore>>;

/// Loaded configuration and state for one vault.
struct App {
    vault: PathBuf,
    config_dir: PathBuf,
    config: Config,
    state: Arc<JsonStateStore>,
}

impl App {
    async fn open(args: &Args) -> Result<Self> {
        if !args.vault.is_dir() {
            bail!("Vault directory not found: {:?}", args.vault);
        }
        let config_dir = args
            .config_dir
            .clone()
            .unwrap_or_else(|| args.vault.join(DEFAULT_CONFIG_DIR));

        let mut config = Config::load(&config_dir)?;
        if let Some(client_id) = &args.client_id {
            config.client_id = client_id.clone();
        }
        if let Some(client_secret) = &args.client_secret {
            config.client_secret = client_secret.clone();
        }

        let state = JsonStateStore::open(&config_dir)
            .await
            .with_context(|| format!("Failed to load sync state from {:?}", config_dir))?;

        Ok(Self {
            vault: args.vault.clone(),
            config_dir,
            config,
            state: Arc::new(state),
        })
    }

    fn oauth_client(&self) -> Result<OAuthClient> {
        if !self.config.has_client() {
            bail!(
                "OAuth client not configured: set clientId and clientSecret in {:?} \
                 or pass --client-id/--client-secret",
                self.config_dir.join(drive_sync::CONFIG_FILE)
            );
        }
        Ok(OAuthClient {
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    async fn drive(&self) -> Result<Drive> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("drive-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let credentials = self.state.load().await?.credentials;

        Ok(DriveClient::new(
            http,
            self.config.endpoints.clone(),
            self.oauth_client()?,
            Arc::clone(&self.state),
            credentials,
        ))
    }

    async fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(SyncOrchestrator::new(
            NativeFs::new(self.vault.clone()),
            self.drive().await?,
            Arc::clone(&self.state),
            Arc::new(EventBus::new()),
            self.config.orchestrator_options(),
        ))
    }
}

/// Log every sync notification at a level matching its severity.
fn log_events(events: &Arc<EventBus>) -> Subscription {
    events.subscribe(|event| {
        let message = event.message();
        match event {
            SyncEvent::Failed { .. } => error!("{}", message),
            SyncEvent::AuthMissing | SyncEvent::Conflict { .. } => warn!("{}", message),
            _ => info!("{}", message),
        }
    })
}

async fn sync_once(app: &App) -> Result<()> {
    let orchestrator = app.orchestrator().await?;
    let _subscription = log_events(orchestrator.events());

    let report = orchestrator.run().await?;
    println!(
        "Uploaded {}, updated {}, downloaded {}, deleted {} local / {} remote, {} folder(s) created",
        report.uploaded.len(),
        report.updated.len(),
        report.downloaded.len(),
        report.deleted_local.len(),
        report.deleted_remote.len(),
        report.folders_created.len()
    );
    for issue in &report.issues {
        println!("Skipped {}: {}", issue.path(), issue);
    }
    Ok(())
}

/// Wait for the next periodic tick, or forever when periodic sync is off.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_and_log(orchestrator: &Orchestrator) {
    match orchestrator.run().await {
        Ok(report) if report.has_changes() => {
            debug!("Applied {} change(s)", report.mutations());
        }
        Ok(_) => {}
        // Already reported through the event log
        Err(SyncError::AuthMissing) | Err(SyncError::AlreadyRunning) => {}
        Err(e) => debug!("Run ended with error: {}", e),
    }
}

async fn watch(app: &App) -> Result<()> {
    let orchestrator = app.orchestrator().await?;
    let _subscription = log_events(orchestrator.events());

    let debounce = Duration::from_millis(app.config.watch.debounce_ms);
    let mut watcher = FileWatcher::new(app.vault.clone(), debounce)
        .with_context(|| format!("Failed to watch {:?}", app.vault))?;
    info!("Watching {:?}", watcher.vault_path());

    // The first tick fires immediately, giving an initial sync
    let mut interval = match app.config.watch.interval_secs {
        0 => None,
        secs => Some(tokio::time::interval(Duration::from_secs(secs))),
    };
    if interval.is_none() {
        run_and_log(&orchestrator).await;
    }

    info!("Running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                debug!("Change detected: {:?} {}", event.kind, event.path);
                run_and_log(&orchestrator).await;
            }

            _ = next_tick(&mut interval) => {
                debug!("Periodic sync");
                run_and_log(&orchestrator).await;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }

        // Changes queued during the run are covered by it
        let dropped = watcher.drain();
        if dropped > 0 {
            debug!("Dropped {} queued change(s)", dropped);
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn login(app: &App, code: &str) -> Result<()> {
    let drive = app.drive().await?;
    drive
        .exchange_code(code.trim())
        .await
        .context("Failed to exchange authorization code")?;
    println!("Logged in to Google Drive.");
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    app.state
        .save_credentials(&Credentials::default())
        .await
        .context("Failed to clear stored credentials")?;
    println!("Logged out.");
    Ok(())
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

async fn status(app: &App) -> Result<()> {
    let state = app.state.load().await?;

    println!("Vault:        {}", display_path(&app.vault));
    println!("Config dir:   {}", display_path(&app.config_dir));
    println!(
        "Logged in:    {}",
        if state.credentials.has_access_token() { "yes" } else { "no" }
    );
    println!(
        "Remote root:  {}",
        state.remote_root_folder_id.as_deref().unwrap_or("(not created yet)")
    );
    println!("Known paths:  {}", state.snapshot.known_paths.len());
    if state.snapshot.last_sync_at_millis > 0 {
        println!(
            "Last sync:    {}",
            format_millis(state.snapshot.last_sync_at_millis)
        );
    } else {
        println!("Last sync:    never");
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,drive_sync=debug,drive_sync_core=debug"
    } else {
        "info,drive_sync=info,drive_sync_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let app = App::open(&args).await?;

    match &args.command {
        Command::Sync => sync_once(&app).await,
        Command::Watch => watch(&app).await,
        Command::AuthUrl => {
            let url = app
                .oauth_client()?
                .authorization_url(&app.config.endpoints)
                .context("Invalid authorization endpoint")?;
            println!("Open this URL, grant access, then run `drive-sync login --code <CODE>`:");
            println!("{}", url);
            Ok(())
        }
        Command::Login { code } => login(&app, code).await,
        Command::Logout => logout(&app).await,
        Command::Status => status(&app).await,
    }
}
