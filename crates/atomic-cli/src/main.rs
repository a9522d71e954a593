//! atomicctl: verification and signing CLI for atomic ledgers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;

use atomic_core::atomic::Atomic;
use atomic_core::error::{AtomicError, Result};
use atomic_core::ids::TraceId;
use atomic_canonical::content_hash;
use atomic_crypto::{generate_keypair, sign, signing_key_from_hex, signing_key_hex,
    verifying_key_from_hex, verifying_key_hex};
use atomic_ledger::{ChainVerifier, LedgerStore, QueryFilter, VerifyOptions};

mod env;
mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "atomicctl")]
#[command(about = "Tamper-evident ledger verification and signing")]
#[command(version)]
struct Cli {
    /// Output format for results and errors
    #[arg(short = 'o', long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a ledger file line by line
    Verify {
        /// Ledger file (defaults to $LEDGER_PATH)
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Verifying key as hex (defaults to $PUBLIC_KEY_HEX)
        #[arg(long)]
        key: Option<String>,
        /// Restrict verification to one trace
        #[arg(long)]
        trace_id: Option<String>,
        /// Enforce the prev-hash chain
        #[arg(long)]
        check_prev_chain: bool,
        /// Halt at the first hard error
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Hash and sign one atomic read from a JSON file
    Sign {
        /// File holding one atomic as JSON
        file: PathBuf,
    },
    /// Print the content hash of one atomic
    Hash {
        /// File holding one atomic as JSON
        file: PathBuf,
    },
    /// Structurally validate one atomic
    Lint {
        /// File holding one atomic as JSON
        file: PathBuf,
    },
    /// Generate a fresh Ed25519 keypair
    GenerateKeys,
    /// Aggregate counts over a ledger file
    Stats {
        /// Ledger file (defaults to $LEDGER_PATH)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// List the atomics of one trace
    Query {
        /// Ledger file (defaults to $LEDGER_PATH)
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long)]
        trace_id: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::render_error(cli.output, &e);
            ExitCode::FAILURE
        }
    }
}

/// Execute the command; `Ok(false)` means a clean run that found failures.
fn run(cli: &Cli) -> Result<bool> {
    match &cli.command {
        Commands::Verify {
            ledger,
            key,
            trace_id,
            check_prev_chain,
            stop_on_error,
        } => {
            let path = resolve_ledger(ledger.as_deref())?;
            let public_key = match key.clone().or_else(env::public_key_hex) {
                Some(raw) => Some(verifying_key_from_hex(&raw)?),
                None => None,
            };
            let trace_id = trace_id.as_deref().map(TraceId::parse).transpose()?;
            let verifier = ChainVerifier::new(VerifyOptions {
                trace_id,
                check_prev_chain: *check_prev_chain,
                stop_on_error: *stop_on_error,
                public_key,
            });
            let report = verifier.verify_file(&path)?;
            output::render_report(cli.output, &report);
            Ok(report.is_clean())
        }

        Commands::Sign { file } => {
            let atomic = read_atomic(file)?;
            let key_hex = env::signing_key_hex().ok_or_else(|| AtomicError::SignatureError {
                reason: format!("{} is not set", env::SIGNING_KEY_ENV),
            })?;
            let sk = signing_key_from_hex(&key_hex)?;
            let signed = sign(&atomic, &sk)?;
            println!("{}", signed.to_json()?);
            Ok(true)
        }

        Commands::Hash { file } => {
            let atomic = read_atomic(file)?;
            let digest = content_hash(&atomic.to_value())?;
            match cli.output {
                OutputFormat::Table => println!("{digest}"),
                _ => output::print_json(&json!({ "hash": digest })),
            }
            Ok(true)
        }

        Commands::Lint { file } => {
            let atomic = read_atomic(file)?;
            atomic.validate()?;
            match cli.output {
                OutputFormat::Table => println!("ok"),
                _ => output::print_json(&json!({ "ok": true })),
            }
            Ok(true)
        }

        Commands::GenerateKeys => {
            let (sk, vk) = generate_keypair();
            match cli.output {
                OutputFormat::Table => {
                    println!("private_key {}", signing_key_hex(&sk));
                    println!("public_key  {}", verifying_key_hex(&vk));
                }
                _ => output::print_json(&json!({
                    "private_key": signing_key_hex(&sk),
                    "public_key": verifying_key_hex(&vk),
                })),
            }
            Ok(true)
        }

        Commands::Stats { ledger } => {
            let path = resolve_ledger(ledger.as_deref())?;
            let stats = LedgerStore::open(path)?.stats()?;
            output::render_stats(cli.output, &stats);
            Ok(true)
        }

        Commands::Query { ledger, trace_id } => {
            let path = resolve_ledger(ledger.as_deref())?;
            let filter = QueryFilter {
                trace_id: Some(TraceId::parse(trace_id.as_str())?),
                ..QueryFilter::default()
            };
            let items = LedgerStore::open(path)?.query(&filter)?;
            match cli.output {
                OutputFormat::Json => {
                    let values: Vec<_> = items.iter().map(Atomic::to_value).collect();
                    output::print_json(&serde_json::Value::Array(values));
                }
                OutputFormat::Ndjson => {
                    for item in &items {
                        output::print_json(&item.to_value());
                    }
                }
                OutputFormat::Table => {
                    for item in &items {
                        println!(
                            "{}  {}  {}  {}",
                            item.created_at_raw().unwrap_or("-"),
                            item.entity_type().unwrap_or("-"),
                            item.action().unwrap_or("-"),
                            item.hash().map(output::short_hash).unwrap_or("-"),
                        );
                    }
                    println!("{} atomic(s)", items.len());
                }
            }
            Ok(true)
        }
    }
}

fn resolve_ledger(flag: Option<&Path>) -> Result<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(env::ledger_path)
        .ok_or_else(|| {
            AtomicError::repository(
                "no ledger file",
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("pass --ledger or set {}", env::LEDGER_PATH_ENV),
                ),
            )
        })
}

fn read_atomic(path: &Path) -> Result<Atomic> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AtomicError::repository(format!("read {}", path.display()), e))?;
    Atomic::from_json(&raw)
}
