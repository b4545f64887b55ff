//! securebox: end-to-end encrypted file exchange
//!
//! Identity:
//!   create-id <name> <email>          - generate a key pair and register it
//!   search-id <query>                 - find users by name or email
//!   delete-id                         - delete the identity held in the bundle
//!
//! Remote files:
//!   upload <file> --dest-id <id>      - sign, encrypt and upload for a receiver
//!   list-files                        - list files uploaded by this user
//!   download <file-id> --source-id    - download, decrypt and verify
//!   delete-files <file-id>...         - delete uploaded files
//!
//! Local files:
//!   encrypt | sign | enc-sign         - write <file>.enc | .signed | .crypt
//!   decrypt | verify                  - undo them

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use securebox_api::HttpDirectory;
use securebox_core::config::expand_tilde;
use securebox_core::SecureBoxConfig;
use securebox_client::{bundle_store, Session, SessionOptions};
use securebox_secrets::{prompt, Bundle, BundleStore, Opened};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "securebox",
    version,
    about = "SecureBox end-to-end encryption client",
    long_about = "securebox: sign and encrypt files for other users, exchange them through the SecureBox server"
)]
struct Cli {
    /// Path to securebox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SECUREBOX_CONFIG",
        default_value = "~/.config/securebox/securebox.toml"
    )]
    config: PathBuf,

    /// Directory holding the credential bundle (overrides bundle.dir)
    #[arg(long, env = "SECUREBOX_BUNDLE_DIR")]
    bundle_dir: Option<PathBuf>,

    /// API token, used only when a new bundle is created
    #[arg(long, env = "SECUREBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Bundle password (prompted for when unset)
    #[arg(long, env = "SECUREBOX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "SECUREBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides logging.format
    #[arg(long, env = "SECUREBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Also append logs to this file; overrides logging.file
    #[arg(long, env = "SECUREBOX_LOG_FILE", alias = "log_file")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key pair and register it with the directory
    #[command(alias = "create_id")]
    CreateId { name: String, email: String },

    /// Search users whose name or email contains a string
    #[command(alias = "search_id")]
    SearchId { query: String },

    /// Delete the identity stored in the bundle
    #[command(alias = "delete_id")]
    DeleteId,

    /// Sign and encrypt a file for a receiver, then upload it
    Upload {
        file: PathBuf,
        /// Receiver's user id
        #[arg(long, alias = "dest_id")]
        dest_id: String,
    },

    /// List the files this user has uploaded
    #[command(alias = "list_files")]
    ListFiles,

    /// Download a file, decrypt it and verify the sender's signature
    Download {
        file_id: String,
        /// Sender's user id
        #[arg(long, alias = "source_id")]
        source_id: String,
        /// Directory to write the file into
        #[arg(long, short = 'o', default_value = ".")]
        output: PathBuf,
    },

    /// Delete uploaded files
    #[command(alias = "delete_files")]
    DeleteFiles {
        #[arg(required = true)]
        file_ids: Vec<String>,
    },

    /// Encrypt a file for a receiver without signing (writes <file>.enc)
    Encrypt {
        file: PathBuf,
        #[arg(long, alias = "dest_id")]
        dest_id: String,
    },

    /// Sign a file without encrypting (writes <file>.signed)
    Sign { file: PathBuf },

    /// Sign, then encrypt for a receiver (writes <file>.crypt)
    #[command(alias = "enc_sign")]
    EncSign {
        file: PathBuf,
        #[arg(long, alias = "dest_id")]
        dest_id: String,
    },

    /// Decrypt a .enc or .crypt file; also verifies when a sender is given
    Decrypt {
        file: PathBuf,
        #[arg(long, alias = "source_id")]
        source_id: Option<String>,
    },

    /// Verify a .signed file and restore its content
    Verify {
        file: PathBuf,
        #[arg(long, alias = "source_id")]
        source_id: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let mut config = SecureBoxConfig::load(&config_path)?;
    if let Some(dir) = &cli.bundle_dir {
        config.bundle.dir = dir.clone();
    }

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match &cli.log_format {
        Some(f) => f.clone(),
        None => LogFormat::from_str(&config.logging.format, true)
            .map_err(|e| anyhow::anyhow!("logging.format: {e}"))?,
    };
    let log_file = cli
        .log_file
        .as_ref()
        .or(config.logging.file.as_ref())
        .map(|p| expand_tilde(p));
    let _log_guard = init_logging(level, &format, log_file.as_deref())?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        server = %config.server.base_url,
        "securebox starting"
    );

    let options = SessionOptions::from_config(&config).context("invalid configuration")?;
    let store = bundle_store(&config);

    let existing = open_bundle(&store, cli.password.as_deref()).await?;
    let mut session = match existing {
        Some(bundle) => connect(&config, store, bundle, options)?,
        None => {
            let bundle = first_run(&store, &cli).await?;
            let mut session = connect(&config, store, bundle, options)?;
            if !matches!(cli.command, Commands::CreateId { .. }) {
                let name = prompt_line("Username: ")?;
                let email = prompt_line("Email: ")?;
                cmd_create_id(&mut session, &name, &email).await?;
            }
            session
        }
    };

    match cli.command {
        Commands::CreateId { name, email } => cmd_create_id(&mut session, &name, &email).await,
        Commands::SearchId { query } => cmd_search_id(&session, &query).await,
        Commands::DeleteId => cmd_delete_id(&mut session).await,
        Commands::Upload { file, dest_id } => cmd_upload(&session, &file, &dest_id).await,
        Commands::ListFiles => cmd_list_files(&session).await,
        Commands::Download {
            file_id,
            source_id,
            output,
        } => cmd_download(&session, &file_id, &source_id, &output).await,
        Commands::DeleteFiles { file_ids } => cmd_delete_files(&session, &file_ids).await,
        Commands::Encrypt { file, dest_id } => {
            let out = session
                .encrypt_file(&file, &dest_id)
                .await
                .with_context(|| format!("encrypting {}", file.display()))?;
            report_written(&out)
        }
        Commands::Sign { file } => {
            let out = session
                .sign_file(&file)
                .await
                .with_context(|| format!("signing {}", file.display()))?;
            report_written(&out)
        }
        Commands::EncSign { file, dest_id } => {
            let out = session
                .enc_sign_file(&file, &dest_id)
                .await
                .with_context(|| format!("protecting {}", file.display()))?;
            report_written(&out)
        }
        Commands::Decrypt { file, source_id } => {
            let out = session
                .decrypt_file(&file, source_id.as_deref())
                .await
                .with_context(|| format!("decrypting {}", file.display()))?;
            report_written(&out)
        }
        Commands::Verify { file, source_id } => {
            let out = session
                .verify_file(&file, &source_id)
                .await
                .with_context(|| format!("verifying {}", file.display()))?;
            report_written(&out)
        }
    }
}

fn init_logging(
    level: &str,
    format: &LogFormat,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = log_file_writer(path)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    // stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
                .init();
        }
    }
    Ok(guard)
}

/// Non-blocking appender for `path`. Logs are flushed when the guard drops.
fn log_file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("log file has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory: {}", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("opening log file: {}", path.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

// ── Bundle and session setup ──────────────────────────────────────────────────

/// Load the bundle, asking for its password when it is encrypted.
///
/// `None` means nothing is on disk yet.
async fn open_bundle(store: &BundleStore, password: Option<&str>) -> Result<Option<Bundle>> {
    let opened = store
        .open()
        .await
        .with_context(|| format!("opening bundle in {}", store.dir().display()))?;

    match opened {
        Opened::Plain(bundle) => Ok(Some(bundle)),
        Opened::Locked(locked) => {
            let password = match password {
                Some(p) => SecretString::from(p.to_string()),
                None => prompt::ask_password("Bundle password: ")
                    .context("reading bundle password")?,
            };
            let bundle = locked
                .unlock(password)
                .with_context(|| format!("unlocking {}", store.encrypted_path().display()))?;
            Ok(Some(bundle))
        }
        Opened::Missing => Ok(None),
    }
}

/// Set up a new bundle: token and password, written before anything else runs.
async fn first_run(store: &BundleStore, cli: &Cli) -> Result<Bundle> {
    eprintln!(
        "No credential bundle in {}, creating one.",
        store.dir().display()
    );

    let token = match &cli.token {
        Some(t) => t.trim().to_string(),
        None => prompt::ask_password("API token: ")
            .context("reading API token")?
            .expose_secret()
            .trim()
            .to_string(),
    };
    if token.is_empty() {
        anyhow::bail!("an API token is required to use the SecureBox server");
    }

    let password = match &cli.password {
        Some(p) => SecretString::from(p.clone()),
        None => prompt::ask_new_password().context("reading bundle password")?,
    };

    let mut bundle = store.create(password);
    bundle.set_token(token);
    store.write(&bundle).await.context("writing new bundle")?;
    Ok(bundle)
}

fn connect(
    config: &SecureBoxConfig,
    store: BundleStore,
    bundle: Bundle,
    options: SessionOptions,
) -> Result<Session<HttpDirectory>> {
    let timeout = (config.server.timeout_secs > 0)
        .then(|| Duration::from_secs(config.server.timeout_secs));
    let directory = HttpDirectory::new(
        &config.server.base_url,
        bundle.token().unwrap_or_default(),
        timeout,
    )
    .with_context(|| format!("building API client for {}", config.server.base_url))?;
    Ok(Session::new(directory, store, bundle, options))
}

fn prompt_line(label: &str) -> Result<String> {
    let mut err = std::io::stderr();
    write!(err, "{label}")?;
    err.flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading from stdin")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{} must not be empty", label.trim_end_matches(": "));
    }
    Ok(value)
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── Identity commands ─────────────────────────────────────────────────────────

async fn cmd_create_id(session: &mut Session<HttpDirectory>, name: &str, email: &str) -> Result<()> {
    if let Some(old) = session.bundle().user_id() {
        eprintln!("Replacing identity {old} in the bundle.");
    }

    let pb = make_spinner("create-id");
    pb.set_message(format!(
        "generating {}-bit key for {email}",
        session.options().rsa_bits
    ));
    let result = session.create_id(name, email).await;
    pb.finish_and_clear();
    let user_id = result.context("creating identity")?;

    println!("Identity created:");
    println!("  user id: {user_id}");
    println!("  name:    {name}");
    println!("  email:   {email}");
    Ok(())
}

async fn cmd_search_id(session: &Session<HttpDirectory>, query: &str) -> Result<()> {
    let users = session
        .search_id(query)
        .await
        .with_context(|| format!("searching for {query:?}"))?;

    if users.is_empty() {
        println!("No users match {query:?}");
        return Ok(());
    }
    println!("{:<12} {:<24} EMAIL", "USER ID", "NAME");
    for user in &users {
        println!("{:<12} {:<24} {}", user.user_id, user.name, user.email);
    }
    println!("{} user(s)", users.len());
    Ok(())
}

async fn cmd_delete_id(session: &mut Session<HttpDirectory>) -> Result<()> {
    let user_id = session.delete_id().await.context("deleting identity")?;
    println!("Deleted identity {user_id}");
    Ok(())
}

// ── Remote file commands ──────────────────────────────────────────────────────

async fn cmd_upload(session: &Session<HttpDirectory>, file: &Path, dest_id: &str) -> Result<()> {
    let pb = make_spinner("upload");
    pb.set_message(format!("{} → {dest_id}", file.display()));
    let result = session.upload(file, dest_id).await;
    pb.finish_and_clear();
    let receipt = result.with_context(|| format!("uploading {}", file.display()))?;

    println!("Uploaded {}", file.display());
    println!("  file id: {}", receipt.file_id);
    println!("  size:    {}", fmt_bytes(receipt.file_size));
    Ok(())
}

async fn cmd_list_files(session: &Session<HttpDirectory>) -> Result<()> {
    let files = session.list_files().await.context("listing files")?;
    if files.is_empty() {
        println!("No files uploaded");
        return Ok(());
    }
    println!("{:<12} NAME", "FILE ID");
    for file in &files {
        println!("{:<12} {}", file.file_id, file.file_name);
    }
    println!("{} file(s)", files.len());
    Ok(())
}

async fn cmd_download(
    session: &Session<HttpDirectory>,
    file_id: &str,
    source_id: &str,
    output: &Path,
) -> Result<()> {
    let pb = make_spinner("download");
    pb.set_message(format!("{file_id} from {source_id}"));
    let result = session.download(file_id, source_id, output).await;
    pb.finish_and_clear();
    let downloaded = result.with_context(|| format!("downloading {file_id}"))?;

    println!("Downloaded {file_id} (signature verified)");
    println!("  path:  {}", downloaded.path.display());
    println!("  bytes: {}", fmt_bytes(downloaded.bytes as u64));
    Ok(())
}

async fn cmd_delete_files(session: &Session<HttpDirectory>, file_ids: &[String]) -> Result<()> {
    let pb = make_spinner("delete");
    pb.set_message(format!("{} file(s)", file_ids.len()));
    let report = session.delete_files(file_ids).await;
    pb.finish_and_clear();

    let mut failed = 0usize;
    for (file_id, result) in &report {
        match result {
            Ok(()) => println!("  deleted  {file_id}"),
            Err(e) => {
                failed += 1;
                println!("  failed   {file_id}: {e}");
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} deletions failed", report.len());
    }
    Ok(())
}

// ── Local file commands ───────────────────────────────────────────────────────

fn report_written(path: &Path) -> Result<()> {
    println!("Wrote {}", path.display());
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
