//! nimbus: end-to-end encrypted drive CLI
//!
//! Account commands:
//!   init                      - generate account keys and a recovery mnemonic
//!   unlock                    - check the password and print public keys
//!   recover                   - reset the password with the recovery mnemonic
//!   passwd                    - change the account password
//!
//! File commands:
//!   encrypt <in> <out>                - encrypt a file as a root-level node
//!   decrypt <node.json> <in> <out>    - decrypt a node's ciphertext
//!   config show                       - display current configuration

mod local;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use nimbus_core::NimbusConfig;
use nimbus_crypto::encoding;
use nimbus_crypto::UserCryptoProperties;
use nimbus_engine::{CipherEngine, Drive, EnginePool, ProgressFn, Session};

use local::{record_path_for, LocalStore, RecordFile};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "nimbus",
    version,
    about = "Nimbus encrypted drive client",
    long_about = "nimbus: manage account keys and encrypt or decrypt drive files locally"
)]
struct Cli {
    /// Path to nimbus.toml configuration file
    #[arg(long, short = 'c', env = "NIMBUS_CONFIG", default_value = "nimbus.toml")]
    config: PathBuf,

    /// Account crypto properties (JSON, as stored by the drive server)
    #[arg(long, short = 'a', env = "NIMBUS_ACCOUNT", default_value = "nimbus-account.json")]
    account: PathBuf,

    /// Log level filter (overrides logging.level; RUST_LOG wins over both)
    #[arg(long, env = "NIMBUS_LOG")]
    log: Option<String>,

    /// Log format (overrides logging.format)
    #[arg(long, env = "NIMBUS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate new account keys
    ///
    /// Writes the crypto properties to the account file and prints the
    /// recovery mnemonic. The mnemonic is shown once; store it offline.
    Init {
        /// Overwrite an existing account file
        #[arg(long)]
        force: bool,
    },

    /// Unlock the account and print its public keys
    Unlock,

    /// Reset the password using the 24-word recovery mnemonic
    Recover,

    /// Change the account password
    Passwd,

    /// Encrypt a local file as a root-level drive node
    ///
    /// Writes the ciphertext to <OUTPUT> and its node record to
    /// <OUTPUT>.node.json.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// MIME type stored in the encrypted metadata
        #[arg(long)]
        mime: Option<String>,
    },

    /// Decrypt a node's ciphertext using its node record
    Decrypt {
        /// Node record written by `nimbus encrypt`
        record: PathBuf,
        input: PathBuf,
        output: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = NimbusConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "nimbus starting"
    );

    match cli.command {
        Commands::Init { force } => {
            let password = prompt_new_password()?;
            let mnemonic = cmd_init(&config, &cli.account, password, force).await?;
            println!();
            println!("Recovery mnemonic (write it down; it is not stored anywhere):");
            println!();
            println!("  {}", mnemonic.expose_secret());
            Ok(())
        }
        Commands::Unlock => {
            let password = prompt_password("Password: ")?;
            cmd_unlock(&config, &cli.account, password).await
        }
        Commands::Recover => {
            let mnemonic = prompt_password("Recovery mnemonic: ")?;
            let password = prompt_new_password()?;
            cmd_recover(&config, &cli.account, mnemonic, password).await
        }
        Commands::Passwd => {
            let old = prompt_password("Current password: ")?;
            let new = prompt_new_password()?;
            cmd_passwd(&config, &cli.account, old, new).await
        }
        Commands::Encrypt { input, output, mime } => {
            let password = prompt_password("Password: ")?;
            cmd_encrypt(&config, &cli.account, password, &input, &output, mime.as_deref()).await
        }
        Commands::Decrypt { record, input, output } => {
            let password = prompt_password("Password: ")?;
            cmd_decrypt(&config, &cli.account, password, &record, &input, &output).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────────

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let entered = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(entered))
}

fn prompt_new_password() -> Result<SecretString> {
    let first = prompt_password("New password: ")?;
    let second = prompt_password("Repeat new password: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    if first.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(first)
}

// ── Account file ──────────────────────────────────────────────────────────────

async fn read_account(path: &Path) -> Result<UserCryptoProperties> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading account: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing account: {}", path.display()))
}

async fn write_account(path: &Path, properties: &UserCryptoProperties) -> Result<()> {
    let json = serde_json::to_string_pretty(properties).context("serializing account")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing account: {}", path.display()))
}

fn start_engine(config: &NimbusConfig) -> Result<CipherEngine> {
    CipherEngine::start(&config.engine).context("starting cipher engine")
}

async fn unlocked_session(
    config: &NimbusConfig,
    account: &Path,
    password: SecretString,
) -> Result<Session> {
    let properties = read_account(account).await?;
    let mut session = Session::new(start_engine(config)?);
    session
        .unlock(password, properties)
        .await
        .context("unlocking account (wrong password?)")?;
    Ok(session)
}

// ── `nimbus init` ─────────────────────────────────────────────────────────────

async fn cmd_init(
    config: &NimbusConfig,
    account: &Path,
    password: SecretString,
    force: bool,
) -> Result<SecretString> {
    if account.exists() && !force {
        anyhow::bail!(
            "account file already exists: {} (use --force to overwrite)",
            account.display()
        );
    }

    let mut session = Session::new(start_engine(config)?);
    let (properties, mnemonic) = session
        .register(password, config.kdf.params())
        .await
        .context("generating account keys")?;
    write_account(account, &properties).await?;

    println!("# Account written to: {}", account.display());
    println!(
        "{}",
        serde_json::to_string_pretty(&properties).context("serializing account")?
    );
    session.logout();
    Ok(mnemonic)
}

// ── `nimbus unlock` ───────────────────────────────────────────────────────────

async fn cmd_unlock(config: &NimbusConfig, account: &Path, password: SecretString) -> Result<()> {
    let mut session = unlocked_session(config, account, password).await?;
    let keys = session.keys()?;

    println!("Account unlocked: {}", account.display());
    println!("  box public key:     {}", encoding::encode(&keys.box_public_key));
    println!("  signing public key: {}", encoding::encode(&keys.signing_public_key));
    drop(keys);
    session.logout();
    Ok(())
}

// ── `nimbus recover` ──────────────────────────────────────────────────────────

async fn cmd_recover(
    config: &NimbusConfig,
    account: &Path,
    mnemonic: SecretString,
    new_password: SecretString,
) -> Result<()> {
    let properties = read_account(account).await?;
    let mut session = Session::new(start_engine(config)?);
    let recovered = session
        .recover(mnemonic, new_password, properties, config.kdf.params())
        .await
        .context("recovering account (check the mnemonic)")?;
    write_account(account, &recovered).await?;

    println!("Password reset; account updated: {}", account.display());
    session.logout();
    Ok(())
}

// ── `nimbus passwd` ───────────────────────────────────────────────────────────

async fn cmd_passwd(
    config: &NimbusConfig,
    account: &Path,
    old_password: SecretString,
    new_password: SecretString,
) -> Result<()> {
    let old_copy = SecretString::from(old_password.expose_secret().to_owned());
    let mut session = unlocked_session(config, account, old_copy).await?;
    let updated = session
        .change_password(old_password, new_password, config.kdf.params())
        .await
        .context("changing password")?;
    write_account(account, &updated).await?;

    println!("Password changed; account updated: {}", account.display());
    session.logout();
    Ok(())
}

// ── `nimbus encrypt` ──────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &NimbusConfig,
    account: &Path,
    password: SecretString,
    input: &Path,
    output: &Path,
    mime: Option<&str>,
) -> Result<()> {
    let record_path = record_path_for(output);
    if record_path.exists() {
        anyhow::bail!("node record already exists: {}", record_path.display());
    }
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("input has no file name: {}", input.display()))?;

    let session = unlocked_session(config, account, password).await?;
    let keys = session.keys()?;
    let pool = EnginePool::start(config.upload.max_parallel_uploads, &config.engine)
        .context("starting engine pool")?;
    let drive = Drive::new(
        pool.clone(),
        RecordFile::create(&record_path, &keys),
        LocalStore::new(output),
        keys,
        config,
    )?;

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let total = file.metadata().await.map(|m| m.len()).unwrap_or(0);

    let pb = make_progress_bar(total, "encrypt");
    pb.set_message(name.clone());
    let progress = progress_fn(&pb);

    let record = drive
        .upload_file(None, &name, mime, file, Some(&progress))
        .await
        .with_context(|| format!("encrypting {}", input.display()))?;
    pb.finish_with_message("done".to_string());

    println!("  node:       {}", record.id);
    println!("  plaintext:  {}", fmt_bytes(total));
    println!(
        "  ciphertext: {} → {}",
        fmt_bytes(record.encrypted_size.unwrap_or(0)),
        output.display()
    );
    println!("  record:     {}", record_path.display());

    pool.shutdown().await?;
    Ok(())
}

// ── `nimbus decrypt` ──────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &NimbusConfig,
    account: &Path,
    password: SecretString,
    record_path: &Path,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let session = unlocked_session(config, account, password).await?;
    let keys = session.keys()?;
    let records = RecordFile::open(record_path, Some(input), &keys)
        .with_context(|| format!("reading node record: {}", record_path.display()))?;
    let record = records.record()?;

    let pool = EnginePool::start(config.upload.max_parallel_uploads, &config.engine)
        .context("starting engine pool")?;
    let drive = Drive::new(pool.clone(), records, LocalStore::new(input), keys, config)?;

    let metadata = drive
        .read_metadata(&record.id)
        .await
        .context("decrypting node metadata")?;

    let pb = make_progress_bar(metadata.size.unwrap_or(0), "decrypt");
    pb.set_message(metadata.name.clone());
    let progress = progress_fn(&pb);

    let mut out = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    let result = drive.download_file(&record.id, &mut out, Some(&progress)).await;
    drop(out);

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            pb.abandon_with_message("failed".to_string());
            // never leave unauthenticated plaintext behind
            let _ = tokio::fs::remove_file(output).await;
            return Err(e).with_context(|| format!("decrypting {}", input.display()));
        }
    };
    pb.finish_with_message("done".to_string());

    println!("  name:   {}", metadata.name);
    if let Some(mime) = &metadata.mime_type {
        println!("  type:   {mime}");
    }
    println!("  bytes:  {}", fmt_bytes(bytes));
    println!("  output: {}", output.display());

    pool.shutdown().await?;
    Ok(())
}

// ── `nimbus config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &NimbusConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

const BAR_TEMPLATE: &str = "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_fn(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, _stage| pb.set_position(done))
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
