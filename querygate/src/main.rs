//! Command-line front end for the querygate credential vault and gateway.
//!
//! Saved connections are plain JSON files holding a [`StoredConnection`]
//! record; the descriptor inside is encrypted under the master secret from
//! `QUERYGATE_ENCRYPTION_KEY`. Results are written to stdout as JSON and
//! logs go to stderr.
//!
//! # Security Guarantees
//! - Passwords can be entered interactively instead of on disk
//! - Only encrypted descriptors are written out
//! - Responses carry catalog messages, never driver text or credentials

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use querygate_core::logging::init_logging;
use querygate_core::{
    ConnectionDescriptor, ConnectionStore, ConnectionTarget, CredentialVault, DatabaseKind,
    DenylistValidator, GatewayConfig, InMemoryConnectionStore, MasterSecret, QueryGateway,
    QueryValidator, StoredConnection,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "querygate")]
#[command(about = "Credential vault and query gateway")]
#[command(version)]
#[command(long_about = "
querygate - encrypted connection vault and single-query gateway

Stores database connection details encrypted at rest, tests reachability,
and runs one bounded query or collection scan, printing {columns, rows}.

SECURITY FEATURES:
- AES-256-GCM encryption with PBKDF2-HMAC-SHA256 key derivation
- Destructive keywords are rejected before any credential is decrypted
- Error messages never contain credentials or driver output

SUPPORTED DATABASES:
- MySQL (kind: sql_table)
- MongoDB (kind: document)

EXAMPLES:
  querygate encrypt --descriptor db.json --ask-password > saved.json
  querygate test --saved saved.json
  querygate query --saved saved.json 'SELECT id, name FROM users'
  querygate query --descriptor mongo.json events
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Encrypt a descriptor into a saved-connection record
    Encrypt(EncryptArgs),
    /// Decrypt a saved connection and show its non-secret fields
    Inspect(InspectArgs),
    /// Test that a database is reachable with the given credentials
    Test(TargetArgs),
    /// Run one query (SQL) or collection scan (document)
    Query(QueryArgs),
    /// Screen an operation with the validator without connecting
    Check(CheckArgs),
    /// List supported database kinds
    List,
}

#[derive(Args)]
pub struct EncryptArgs {
    /// Descriptor JSON file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    pub descriptor: PathBuf,

    /// Prompt for the password instead of reading it from the descriptor
    #[arg(long)]
    pub ask_password: bool,

    /// Probe the database before writing the record
    #[arg(long)]
    pub verify: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Saved-connection record file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    pub saved: PathBuf,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Plaintext descriptor JSON file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    pub descriptor: Option<PathBuf>,

    /// Saved-connection record file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    pub saved: Option<PathBuf>,
}

#[derive(Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// SQL text, or the collection name for document databases
    pub operation: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Operation to screen
    pub operation: String,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    pub quiet: bool,

    /// Master secret for the vault
    #[arg(
        long,
        global = true,
        env = "QUERYGATE_ENCRYPTION_KEY",
        hide_env_values = true,
        help = "Master secret (at least 16 bytes)"
    )]
    pub master_key: Option<String>,

    /// Connect and probe deadline in seconds
    #[arg(long, global = true, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Query deadline in seconds (0 disables it)
    #[arg(long, global = true, default_value_t = 30)]
    pub query_timeout: u64,
}

impl GlobalArgs {
    fn gateway_config(&self, verify_on_save: bool) -> GatewayConfig {
        GatewayConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            query_timeout: (self.query_timeout > 0).then(|| Duration::from_secs(self.query_timeout)),
            verify_on_save,
        }
    }

    fn vault(&self) -> Result<CredentialVault> {
        let secret = self
            .master_key
            .clone()
            .ok_or_else(|| anyhow!("Master secret is not set (use --master-key or QUERYGATE_ENCRYPTION_KEY)"))?;
        Ok(CredentialVault::new(MasterSecret::new(secret)?))
    }
}

/// Non-secret view of a decrypted descriptor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InspectOutput {
    kind: DatabaseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    has_password: bool,
    ssl: bool,
}

impl From<&ConnectionDescriptor> for InspectOutput {
    fn from(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            target: descriptor.safe_target(),
            username: descriptor
                .credentials
                .as_ref()
                .map(|creds| creds.username().to_string()),
            has_password: descriptor
                .credentials
                .as_ref()
                .is_some_and(|creds| creds.has_password()),
            ssl: descriptor.options.ssl,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    match &cli.command {
        Command::Encrypt(args) => encrypt(&cli.global, args).await,
        Command::Inspect(args) => inspect(&cli.global, args).await,
        Command::Test(args) => test_connection(&cli.global, args).await,
        Command::Query(args) => query(&cli.global, args).await,
        Command::Check(args) => Ok(exit_code(check(&args.operation))),
        Command::List => {
            list_supported_databases();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Encrypts a descriptor and writes the saved-connection record.
async fn encrypt(global: &GlobalArgs, args: &EncryptArgs) -> Result<ExitCode> {
    let mut descriptor = read_descriptor(&args.descriptor).await?;
    if args.ask_password {
        let password = rpassword::prompt_password("Database password: ")
            .context("Failed to read password")?;
        let creds = descriptor
            .credentials
            .as_mut()
            .ok_or_else(|| anyhow!("Descriptor has no username to attach a password to"))?;
        creds.set_password((!password.is_empty()).then_some(password));
    }

    info!("Encrypting connection to {}", descriptor.safe_target());
    let store = Arc::new(InMemoryConnectionStore::new());
    let gateway = QueryGateway::new(global.vault()?, store.clone(), global.gateway_config(args.verify));

    let id = match gateway.save_connection(descriptor).await {
        Ok(id) => id,
        Err(error) => {
            eprintln!("{error}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let record = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("Saved connection disappeared from the store"))?;
    let json = serde_json::to_string_pretty(&record).context("Failed to serialize record")?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Saved connection written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}

/// Decrypts a saved record and prints its non-secret fields.
async fn inspect(global: &GlobalArgs, args: &InspectArgs) -> Result<ExitCode> {
    let record = read_record(&args.saved).await?;
    let vault = global.vault()?;
    let descriptor = tokio::task::spawn_blocking(move || vault.decrypt(&record.blob))
        .await
        .context("Vault task failed")??;

    print_json(&InspectOutput::from(&descriptor))?;
    Ok(ExitCode::SUCCESS)
}

async fn test_connection(global: &GlobalArgs, args: &TargetArgs) -> Result<ExitCode> {
    let (gateway, target) = gateway_for(global, args).await?;

    let response = match target {
        ConnectionTarget::Saved(id) => gateway.test_saved_connection(id).await,
        ConnectionTarget::Descriptor(descriptor) => gateway.test_connection(&descriptor).await,
    };

    print_json(&response)?;
    Ok(exit_code(response.success))
}

async fn query(global: &GlobalArgs, args: &QueryArgs) -> Result<ExitCode> {
    let (gateway, target) = gateway_for(global, &args.target).await?;

    let response = gateway.execute_query(target, &args.operation).await;
    if let Some(rows) = &response.rows {
        debug!("Query returned {} rows", rows.len());
    }

    print_json(&response)?;
    Ok(exit_code(response.success))
}

/// Screens an operation with the default validator.
fn check(operation: &str) -> bool {
    match DenylistValidator::default().validate(operation) {
        Ok(()) => {
            println!("Accepted");
            true
        }
        Err(rejection) => {
            println!("Rejected: contains {}", rejection.keyword);
            false
        }
    }
}

/// Builds a gateway and target from `--descriptor` or `--saved`.
///
/// A descriptor target gets a gateway without a vault, so no master key is
/// needed. A saved record is loaded into a one-entry in-memory store, so it
/// is only decrypted inside the gateway after validation.
async fn gateway_for(
    global: &GlobalArgs,
    args: &TargetArgs,
) -> Result<(QueryGateway, ConnectionTarget)> {
    let config = global.gateway_config(false);

    match (&args.descriptor, &args.saved) {
        (Some(path), _) => {
            let descriptor = read_descriptor(path).await?;
            info!("Target: {}", descriptor.safe_target());
            Ok((QueryGateway::for_descriptors(config), descriptor.into()))
        }
        (None, Some(path)) => {
            let record = read_record(path).await?;
            let id = record.id;
            let store = Arc::new(InMemoryConnectionStore::with_records([record]));
            let gateway = QueryGateway::new(global.vault()?, store, config);
            Ok((gateway, id.into()))
        }
        (None, None) => Err(anyhow!("Either --descriptor or --saved is required")),
    }
}

async fn read_descriptor(path: &Path) -> Result<ConnectionDescriptor> {
    let input = read_input(path).await?;
    ConnectionDescriptor::from_json(&input)
        .map_err(|e| anyhow!("Invalid descriptor in {}: {e}", path.display()))
}

async fn read_record(path: &Path) -> Result<StoredConnection> {
    let input = read_input(path).await?;
    serde_json::from_str(&input)
        .with_context(|| format!("Invalid saved connection in {}", path.display()))
}

/// Reads a file, or stdin when `path` is `-`.
async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input).map(|_| input)
        })
        .await
        .context("stdin reader failed")?
        .context("Failed to read stdin");
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Lists supported database kinds and descriptor formats.
fn list_supported_databases() {
    println!("Supported Database Kinds:");
    println!();

    for kind in DatabaseKind::ALL {
        println!("{} ({}):", kind.engine_name(), kind.as_str());
        println!("  Default port: {}", kind.default_port());
        match kind {
            DatabaseKind::SqlTable => {
                println!("  Operation:    SQL text, e.g. SELECT id FROM users");
                println!(
                    r#"  Descriptor:   {{"kind": "sql_table", "host": "db.internal", "database": "app", "username": "reader"}}"#
                );
            }
            DatabaseKind::Document => {
                println!("  Operation:    collection name (first 1000 documents)");
                println!(
                    r#"  Descriptor:   {{"kind": "document", "host": "mongodb+srv://cluster0.example.net", "database": "app", "options": {{"useConnectionString": true}}}}"#
                );
            }
        }
        println!();
    }

    println!("Security Features:");
    println!("  • AES-256-GCM encryption of saved connections");
    println!("  • Destructive keywords rejected before decryption");
    println!("  • Credential-free error messages");
}
