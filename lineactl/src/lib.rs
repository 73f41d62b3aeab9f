use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use linea_core::{
    load_linea_config, Account, AccountUpdate, CatalogError, ContentKind, DeviceSession,
    IngestError, IngestPipeline, IngestReport, LineaConfig, NewAccount, SessionError,
    SqliteCatalogStore, SqliteSessionStore, SyncMetadata, TemplateEngine, TemplateError,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] linea_core::ConfigError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Linea IPTV gateway control interface", long_about = None)]
pub struct Cli {
    /// Path of the main linea.toml
    #[arg(long, default_value = "configs/linea.toml")]
    pub config: PathBuf,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Alternate path for catalog.sqlite
    #[arg(long)]
    pub catalog_db: Option<PathBuf>,
    /// Alternate path for sessions.sqlite
    #[arg(long)]
    pub sessions_db: Option<PathBuf>,
    /// Token for local authentication (when LINEACTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show catalog and session status
    Status,
    /// Run a full catalog sync against the upstream feed
    Sync,
    /// Remove idle device sessions
    Sweep(SweepArgs),
    /// Subscriber account management
    #[command(subcommand)]
    User(UserCommands),
    /// Device session management
    #[command(subcommand)]
    Devices(DeviceCommands),
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Idle timeout in minutes (defaults to the configured value)
    #[arg(long)]
    pub timeout_minutes: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a subscriber account
    Add(UserAddArgs),
    /// List subscriber accounts
    List,
    /// Update password, device limit, standing or role
    Update(UserUpdateArgs),
    /// Delete an account and its sessions
    Remove(UserRemoveArgs),
}

#[derive(Args, Debug)]
pub struct UserAddArgs {
    pub username: String,
    pub password: String,
    /// Maximum simultaneous devices (defaults to the configured value)
    #[arg(long)]
    pub max_devices: Option<i64>,
    #[arg(long, default_value = "user")]
    pub role: String,
    /// Expiry timestamp, RFC 3339
    #[arg(long)]
    pub expires_at: Option<String>,
}

#[derive(Args, Debug)]
pub struct UserUpdateArgs {
    pub username: String,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub max_devices: Option<i64>,
    #[arg(long)]
    pub active: Option<bool>,
    #[arg(long)]
    pub role: Option<String>,
    /// Expiry timestamp, RFC 3339
    #[arg(long)]
    pub expires_at: Option<String>,
}

#[derive(Args, Debug)]
pub struct UserRemoveArgs {
    pub username: String,
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommands {
    /// List an account's live device sessions
    List(DeviceAccountArgs),
    /// Disconnect one device by fingerprint
    Disconnect(DeviceDisconnectArgs),
    /// Disconnect every device of an account
    DisconnectAll(DeviceAccountArgs),
}

#[derive(Args, Debug)]
pub struct DeviceAccountArgs {
    pub username: String,
}

#[derive(Args, Debug)]
pub struct DeviceDisconnectArgs {
    pub username: String,
    pub fingerprint: String,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Sync => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(context.sync())?;
            render(&SyncSummary::from(report), cli.format)?;
        }
        Commands::Sweep(args) => {
            let result = context.sweep(args)?;
            render(&result, cli.format)?;
        }
        Commands::User(UserCommands::Add(args)) => {
            let account = context.user_add(args)?;
            render(&account, cli.format)?;
        }
        Commands::User(UserCommands::List) => {
            let accounts = context.user_list()?;
            render(&accounts, cli.format)?;
        }
        Commands::User(UserCommands::Update(args)) => {
            let account = context.user_update(args)?;
            render(&account, cli.format)?;
        }
        Commands::User(UserCommands::Remove(args)) => {
            let result = context.user_remove(args)?;
            render(&result, cli.format)?;
        }
        Commands::Devices(DeviceCommands::List(args)) => {
            let devices = context.devices_list(args)?;
            render(&devices, cli.format)?;
        }
        Commands::Devices(DeviceCommands::Disconnect(args)) => {
            let result = context.devices_disconnect(args)?;
            render(&result, cli.format)?;
        }
        Commands::Devices(DeviceCommands::DisconnectAll(args)) => {
            let result = context.devices_disconnect_all(args)?;
            render(&result, cli.format)?;
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("LINEACTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub struct AppContext {
    config: LineaConfig,
    catalog: SqliteCatalogStore,
    sessions: SqliteSessionStore,
    template: Arc<TemplateEngine>,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = load_linea_config(&cli.config)?;

        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.paths.data_dir));
        let catalog_db = cli
            .catalog_db
            .clone()
            .unwrap_or_else(|| data_dir.join("catalog.sqlite"));
        let sessions_db = cli
            .sessions_db
            .clone()
            .unwrap_or_else(|| data_dir.join("sessions.sqlite"));

        std::fs::create_dir_all(&data_dir)?;
        let catalog = SqliteCatalogStore::new(&catalog_db)?;
        catalog.initialize()?;
        let sessions = SqliteSessionStore::new(&sessions_db)?;
        sessions.initialize()?;
        let template = Arc::new(TemplateEngine::new(
            config.template_path(),
            &config.upstream.base_url,
            &config.playlist.public_domain,
        )?);

        Ok(Self {
            config,
            catalog,
            sessions,
            template,
        })
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let accounts = self.sessions.list_accounts()?;
        let mut live_sessions = 0;
        for account in &accounts {
            live_sessions += self.sessions.session_count(&account.id)?;
        }
        Ok(StatusReport {
            channels: self.catalog.count(ContentKind::Channel)? as i64,
            movies: self.catalog.count(ContentKind::Movie)? as i64,
            series: self.catalog.count(ContentKind::Series)? as i64,
            accounts: accounts.len() as i64,
            live_sessions,
            metadata: self.catalog.metadata()?,
        })
    }

    async fn sync(&self) -> Result<IngestReport> {
        let pipeline = IngestPipeline::new(
            self.catalog.clone(),
            Arc::clone(&self.template),
            self.config.clone(),
        )?;
        Ok(pipeline.run().await?)
    }

    fn sweep(&self, args: &SweepArgs) -> Result<SweepResult> {
        let minutes = args
            .timeout_minutes
            .unwrap_or(self.config.sessions.idle_timeout_minutes);
        let removed = self.sessions.sweep_idle(Duration::minutes(minutes))?;
        Ok(SweepResult {
            timeout_minutes: minutes,
            removed: removed as i64,
        })
    }

    fn user_add(&self, args: &UserAddArgs) -> Result<Account> {
        let max_devices = args
            .max_devices
            .unwrap_or(self.config.sessions.default_max_devices);
        let mut account = NewAccount::new(&args.username, &args.password)
            .max_devices(max_devices)
            .role(&args.role);
        if let Some(raw) = &args.expires_at {
            account = account.expires_at(parse_timestamp(raw)?);
        }
        Ok(self.sessions.create_account(account)?)
    }

    fn user_list(&self) -> Result<AccountList> {
        Ok(AccountList {
            rows: self.sessions.list_accounts()?,
        })
    }

    fn user_update(&self, args: &UserUpdateArgs) -> Result<Account> {
        let account = self.account_by_username(&args.username)?;
        let expires_at = match &args.expires_at {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };
        Ok(self.sessions.update_account(
            &account.id,
            AccountUpdate {
                password: args.password.clone(),
                max_devices: args.max_devices,
                active: args.active,
                expires_at,
                role: args.role.clone(),
            },
        )?)
    }

    fn user_remove(&self, args: &UserRemoveArgs) -> Result<RemoveResult> {
        let account = self.account_by_username(&args.username)?;
        self.sessions.delete_account(&account.id)?;
        Ok(RemoveResult {
            username: args.username.clone(),
        })
    }

    fn devices_list(&self, args: &DeviceAccountArgs) -> Result<DeviceList> {
        let account = self.account_by_username(&args.username)?;
        Ok(DeviceList {
            rows: self.sessions.list_devices(&account.id)?,
        })
    }

    fn devices_disconnect(&self, args: &DeviceDisconnectArgs) -> Result<DisconnectResult> {
        let account = self.account_by_username(&args.username)?;
        let removed = self.sessions.disconnect(&account.id, &args.fingerprint)?;
        Ok(DisconnectResult {
            username: args.username.clone(),
            removed: if removed { 1 } else { 0 },
        })
    }

    fn devices_disconnect_all(&self, args: &DeviceAccountArgs) -> Result<DisconnectResult> {
        let account = self.account_by_username(&args.username)?;
        let removed = self.sessions.disconnect_all(&account.id)?;
        Ok(DisconnectResult {
            username: args.username.clone(),
            removed: removed as i64,
        })
    }

    fn account_by_username(&self, username: &str) -> Result<Account> {
        self.sessions
            .account_by_username(username)?
            .ok_or_else(|| AppError::MissingResource(format!("account '{username}'")))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::InvalidArgument(format!("expires_at '{raw}': {err}")))
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub channels: i64,
    pub movies: i64,
    pub series: i64,
    pub accounts: i64,
    pub live_sessions: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SyncMetadata>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!(
                "Catalog: {} channels, {} movies, {} series",
                self.channels, self.movies, self.series
            ),
            format!(
                "Accounts: {} ({} live sessions)",
                self.accounts, self.live_sessions
            ),
        ];
        match &self.metadata {
            Some(metadata) => {
                if let Some(last_sync) = metadata.last_sync {
                    lines.push(format!("Last sync: {last_sync}"));
                }
                if let Some(bytes) = metadata.template_bytes {
                    lines.push(format!("Template: {bytes} bytes"));
                }
            }
            None => lines.push("Last sync: never".to_string()),
        }
        lines.join("\n")
    }
}

/// Flattened ingest report for rendering.
#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub skipped_write: bool,
    pub total_entries: usize,
    pub inserted: usize,
    pub failed: usize,
    pub download_secs: f64,
    pub write_secs: f64,
    pub total_secs: f64,
    pub template_path: String,
}

impl From<IngestReport> for SyncSummary {
    fn from(report: IngestReport) -> Self {
        Self {
            skipped_write: report.skipped_write,
            total_entries: report.total_entries,
            inserted: report.channels.inserted + report.movies.inserted + report.series.inserted,
            failed: report.failed_records(),
            download_secs: report.download_secs,
            write_secs: report.write_secs,
            total_secs: report.total_secs,
            template_path: report.template_path,
        }
    }
}

impl DisplayFallback for SyncSummary {
    fn display(&self) -> String {
        if self.skipped_write {
            return format!(
                "Catalog already in sync ({} entries), template refreshed at {}",
                self.total_entries, self.template_path
            );
        }
        format!(
            "Synced {} entries ({} inserted, {} failed) in {:.2}s\nTemplate: {}",
            self.total_entries, self.inserted, self.failed, self.total_secs, self.template_path
        )
    }
}

#[derive(Debug, Serialize)]
pub struct SweepResult {
    pub timeout_minutes: i64,
    pub removed: i64,
}

impl DisplayFallback for SweepResult {
    fn display(&self) -> String {
        format!(
            "Removed {} sessions idle for more than {} minutes",
            self.removed, self.timeout_minutes
        )
    }
}

#[derive(Debug, Serialize)]
pub struct AccountList {
    pub rows: Vec<Account>,
}

impl DisplayFallback for AccountList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No accounts".to_string();
        }
        let mut lines = Vec::new();
        for account in &self.rows {
            let expiry = account
                .expires_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{} | max_devices={} | active={} | role={} | expires={}",
                account.username, account.max_devices, account.active, account.role, expiry
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Account {
    fn display(&self) -> String {
        format!(
            "{} | max_devices={} | active={} | role={}",
            self.username, self.max_devices, self.active, self.role
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceList {
    pub rows: Vec<DeviceSession>,
}

impl DisplayFallback for DeviceList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No live devices".to_string();
        }
        let mut lines = Vec::new();
        for session in &self.rows {
            let last = session
                .last_activity
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{} | {} ({}) | {} | last_activity={}",
                session.fingerprint,
                session.device_name,
                session.device_class,
                session.remote_addr,
                last
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RemoveResult {
    pub username: String,
}

impl DisplayFallback for RemoveResult {
    fn display(&self) -> String {
        format!("Account '{}' removed", self.username)
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectResult {
    pub username: String,
    pub removed: i64,
}

impl DisplayFallback for DisconnectResult {
    fn display(&self) -> String {
        format!(
            "Disconnected {} device(s) of '{}'",
            self.removed, self.username
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(root: &std::path::Path) -> PathBuf {
        let data_dir = root.join("data");
        let m3u_dir = data_dir.join("m3u");
        std::fs::create_dir_all(&m3u_dir).unwrap();
        let config = format!(
            "[paths]\n\
             base_dir = \"{root}\"\n\
             data_dir = \"{data}\"\n\
             m3u_dir = \"{m3u}\"\n\n\
             [upstream]\n\
             feed_url = \"file://{root}/feed.m3u\"\n\
             base_url = \"http://h:80\"\n\
             download_timeout_seconds = 5\n\n\
             [playlist]\n\
             public_domain = \"http://tv.example.com\"\n\
             template_filename = \"playlist_template.m3u\"\n\
             default_logo_url = \"http://logos/default.png\"\n\n\
             [ingest]\n\
             batch_size = 100\n\
             workers = 1\n\
             max_retries = 2\n\
             retry_base_seconds = 0\n\
             delete_batch_size = 100\n\
             delete_max_attempts = 10\n\
             delete_pause_ms = 0\n\n\
             [sessions]\n\
             idle_timeout_minutes = 30\n\
             default_max_devices = 2\n\n\
             [proxy]\n\
             user_agent = \"linea-test\"\n\
             connect_timeout_seconds = 2\n\
             read_timeout_seconds = 2\n",
            root = root.display(),
            data = data_dir.display(),
            m3u = m3u_dir.display(),
        );
        let path = root.join("linea.toml");
        std::fs::write(&path, config).unwrap();
        path
    }

    fn prepare_context(root: &std::path::Path) -> AppContext {
        let cli = Cli {
            config: write_config(root),
            data_dir: None,
            catalog_db: None,
            sessions_db: None,
            token: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        AppContext::new(&cli).unwrap()
    }

    #[test]
    fn user_lifecycle_through_the_context() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(temp.path());

        let account = context
            .user_add(&UserAddArgs {
                username: "bob".to_string(),
                password: "secret123".to_string(),
                max_devices: Some(3),
                role: "user".to_string(),
                expires_at: None,
            })
            .unwrap();
        assert_eq!(account.max_devices, 3);

        let updated = context
            .user_update(&UserUpdateArgs {
                username: "bob".to_string(),
                password: None,
                max_devices: Some(5),
                active: Some(false),
                role: None,
                expires_at: None,
            })
            .unwrap();
        assert_eq!(updated.max_devices, 5);
        assert!(!updated.active);

        let list = context.user_list().unwrap();
        assert_eq!(list.rows.len(), 1);

        context
            .user_remove(&UserRemoveArgs {
                username: "bob".to_string(),
            })
            .unwrap();
        assert!(context.user_list().unwrap().rows.is_empty());
    }

    #[test]
    fn status_reports_empty_catalog() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(temp.path());
        let status = context.gather_status().unwrap();
        assert_eq!(status.channels, 0);
        assert_eq!(status.accounts, 0);
        assert!(status.metadata.is_none());
    }

    #[test]
    fn sync_command_runs_against_a_local_feed() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("feed.m3u"),
            "#EXTM3U\n\
             #EXTINF:-1 tvg-name=\"La 1\" group-title=\"ES|TV\",La 1 HD\n\
             http://h:80/u/p/456\n",
        )
        .unwrap();
        let context = prepare_context(temp.path());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let report = runtime.block_on(context.sync()).unwrap();
        assert_eq!(report.total_entries, 1);
        assert_eq!(report.channels.inserted, 1);

        let status = context.gather_status().unwrap();
        assert_eq!(status.channels, 1);
        assert!(status.metadata.is_some());
    }

    #[test]
    fn missing_account_is_reported_as_missing_resource() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(temp.path());
        let err = context
            .devices_list(&DeviceAccountArgs {
                username: "ghost".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::MissingResource(_)));
    }
}
