use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use inscript_core::{
    linearizer, parser, ContractRegistry, Engine, InMemoryStateStore, StateStore,
    StaticCallSimulator, Transaction,
};

/// Inscript — deterministic contract execution CLI
///
/// Lint, canonicalize, hash, and execute Inscript contracts.
#[derive(Parser)]
#[command(name = "inscript", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and linearize a contract file
    Lint {
        /// Path to .inscript file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical source of a contract file
    Canonicalize {
        /// Path to .inscript file
        file: PathBuf,
    },

    /// Print the init code hash of a contract file
    Hash {
        /// Path to .inscript file
        file: PathBuf,
    },

    /// Print the public ABIs of a contract file as JSON
    Abi {
        /// Path to .inscript file
        file: PathBuf,
        /// Only non-abstract (deployable) contracts
        #[arg(long)]
        deployable_only: bool,
    },

    /// Execute a JSON block file against a fresh in-memory chain
    Run {
        /// Path to block .json file
        file: PathBuf,
        /// Directory holding .inscript sources for `type` payloads
        #[arg(long)]
        contracts_dir: Option<PathBuf>,
        /// Output receipts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a block file, then issue a read-only call
    Call {
        /// Path to block .json file
        file: PathBuf,
        /// Directory holding .inscript sources for `type` payloads
        #[arg(long)]
        contracts_dir: Option<PathBuf>,
        /// Target address, or created:N for the Nth transaction's contract
        #[arg(long)]
        to: String,
        /// Function name
        #[arg(long)]
        function: String,
        /// JSON arguments
        #[arg(long)]
        args: Option<String>,
        /// Caller address
        #[arg(long)]
        from: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Lint { file, json } => cmd_lint(&file, json),
        Commands::Canonicalize { file } => cmd_canonicalize(&file),
        Commands::Hash { file } => cmd_hash(&file),
        Commands::Abi {
            file,
            deployable_only,
        } => cmd_abi(&file, deployable_only),
        Commands::Run {
            file,
            contracts_dir,
            json,
        } => cmd_run(&file, contracts_dir.as_deref(), json),
        Commands::Call {
            file,
            contracts_dir,
            to,
            function,
            args,
            from,
        } => cmd_call(
            &file,
            contracts_dir.as_deref(),
            &to,
            &function,
            args.as_deref(),
            from.as_deref(),
        ),
        Commands::Version => {
            println!("inscript {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    process::exit(exit_code);
}

// ── File commands ──────────────────────────────────────────

/// File stem names the main contract
fn main_name(file: &Path) -> Option<String> {
    file.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn read_source(file: &Path) -> Result<(String, String), i32> {
    let name = match main_name(file) {
        Some(name) => name,
        None => {
            eprintln!("{} cannot derive contract name from path", "error:".red());
            return Err(2);
        }
    };
    match std::fs::read_to_string(file) {
        Ok(text) => Ok((name, text)),
        Err(err) => {
            eprintln!("{} {}: {}", "error:".red(), file.display(), err);
            Err(2)
        }
    }
}

fn linearize_file(file: &Path) -> Result<linearizer::LinearizedContract, i32> {
    let (name, text) = read_source(file)?;
    let unit = match parser::parse(&text) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("{} {}", "error:".red(), err);
            return Err(1);
        }
    };
    linearizer::linearize(&unit, &name).map_err(|err| {
        eprintln!("{} {}", "error:".red(), err);
        1
    })
}

fn cmd_lint(file: &Path, json: bool) -> i32 {
    match linearize_file(file) {
        Ok(result) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": true,
                        "contract": result.name,
                        "retained": result.order,
                        "init_code_hash": result.init_code_hash,
                    })
                );
            } else {
                println!(
                    "{} {} ({} contract(s) retained)",
                    "valid:".green(),
                    result.name,
                    result.order.len()
                );
                println!("init_code_hash: {}", result.init_code_hash);
            }
            0
        }
        Err(code) => code,
    }
}

fn cmd_canonicalize(file: &Path) -> i32 {
    match linearize_file(file) {
        Ok(result) => {
            print!("{}", result.canonical_source);
            0
        }
        Err(code) => code,
    }
}

fn cmd_hash(file: &Path) -> i32 {
    match linearize_file(file) {
        Ok(result) => {
            println!("{}", result.init_code_hash);
            0
        }
        Err(code) => code,
    }
}

fn cmd_abi(file: &Path, deployable_only: bool) -> i32 {
    let (name, text) = match read_source(file) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let registry = ContractRegistry::new();
    if let Err(err) = registry.compile_source(&name, &text) {
        eprintln!("{} {}", "error:".red(), err);
        return 1;
    }
    match serde_json::to_string_pretty(&registry.all_abis(deployable_only)) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red(), err);
            2
        }
    }
}

// ── Block execution ────────────────────────────────────────

struct Chain {
    engine: Arc<Engine>,
    receipts: Vec<inscript_core::TransactionReceipt>,
    had_failure: bool,
}

fn run_block(file: &Path, contracts_dir: Option<&Path>) -> Result<Chain, i32> {
    let text = std::fs::read_to_string(file).map_err(|err| {
        eprintln!("{} {}: {}", "error:".red(), file.display(), err);
        2
    })?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&text).map_err(|err| {
        eprintln!("{} {} is not a JSON array: {}", "error:".red(), file.display(), err);
        2
    })?;

    let contracts_dir = contracts_dir
        .map(Path::to_path_buf)
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let registry = Arc::new(ContractRegistry::new());
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Arc::new(Engine::new(
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn StateStore>,
    ));

    let mut chain = Chain {
        engine,
        receipts: Vec::new(),
        had_failure: false,
    };

    for (i, entry) in entries.iter().enumerate() {
        let from = entry
            .get("from")
            .and_then(|v| v.as_str())
            .unwrap_or("0x0000000000000000000000000000000000000000")
            .to_string();
        let mut payload = entry.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        if let Err(code) = expand_payload(&mut payload, &contracts_dir, &chain.receipts) {
            return Err(code);
        }

        let block_number = (i + 1) as u64;
        let tx = Transaction {
            transaction_hash: format!(
                "0x{}",
                linearizer::content_hash(&format!("{}|{}", i, payload))
            ),
            from,
            block_number,
            block_hash: format!("0x{}", linearizer::content_hash(&format!("block|{}", i))),
            block_timestamp: 1_700_000_000 + block_number,
            transaction_index: 0,
            payload,
        };

        match chain.engine.execute_transaction(&tx) {
            Ok(receipt) => {
                if !receipt.is_success() {
                    chain.had_failure = true;
                }
                chain.receipts.push(receipt);
            }
            Err(err) => {
                eprintln!("{} transaction {}: {}", "invalid:".red(), i, err);
                chain.had_failure = true;
            }
        }
        store.set_block_tip(block_number);
    }

    Ok(chain)
}

/// Expand CLI conveniences: a `type` key compiles a named source file into
/// source_code + init_code_hash, and created:N resolves to the address the
/// Nth transaction deployed.
fn expand_payload(
    payload: &mut serde_json::Value,
    contracts_dir: &Path,
    receipts: &[inscript_core::TransactionReceipt],
) -> Result<(), i32> {
    let data = match payload.get_mut("data").and_then(|d| d.as_object_mut()) {
        Some(data) => data,
        None => return Ok(()),
    };

    if let Some(type_name) = data.remove("type") {
        let name = type_name.as_str().unwrap_or_default().to_string();
        let source_path = contracts_dir.join(format!("{}.inscript", name));
        let result = linearize_file(&source_path)?;
        data.insert(
            "source_code".to_string(),
            serde_json::Value::String(result.canonical_source),
        );
        data.insert(
            "init_code_hash".to_string(),
            serde_json::Value::String(result.init_code_hash),
        );
    }

    if let Some(to) = data.get("to").and_then(|v| v.as_str()) {
        if let Some(index) = to.strip_prefix("created:") {
            let index: usize = index.parse().map_err(|_| {
                eprintln!("{} bad created:N reference: {}", "error:".red(), to);
                2
            })?;
            let address = receipts
                .get(index)
                .and_then(|r| r.created_contract_address.clone())
                .ok_or_else(|| {
                    eprintln!(
                        "{} transaction {} created no contract",
                        "error:".red(),
                        index
                    );
                    2
                })?;
            data.insert("to".to_string(), serde_json::Value::String(address));
        }
    }

    Ok(())
}

fn cmd_run(file: &Path, contracts_dir: Option<&Path>, json: bool) -> i32 {
    let chain = match run_block(file, contracts_dir) {
        Ok(chain) => chain,
        Err(code) => return code,
    };

    if json {
        match serde_json::to_string_pretty(&chain.receipts) {
            Ok(out) => println!("{}", out),
            Err(err) => {
                eprintln!("{} {}", "error:".red(), err);
                return 2;
            }
        }
    } else {
        for receipt in &chain.receipts {
            let status = if receipt.is_success() {
                "success".green()
            } else {
                "failure".red()
            };
            let target = receipt
                .effective_contract_address
                .clone()
                .unwrap_or_else(|| "-".to_string());
            let function = receipt.function.clone().unwrap_or_else(|| "-".to_string());
            println!(
                "block {:>3}  {}  {}  {}  {}",
                receipt.block_number, status, receipt.call_type, target, function
            );
            if let Some(error) = &receipt.error {
                println!("          {}", error["message"].as_str().unwrap_or(""));
            }
        }
    }

    if chain.had_failure {
        1
    } else {
        0
    }
}

fn cmd_call(
    file: &Path,
    contracts_dir: Option<&Path>,
    to: &str,
    function: &str,
    args: Option<&str>,
    from: Option<&str>,
) -> i32 {
    let chain = match run_block(file, contracts_dir) {
        Ok(chain) => chain,
        Err(code) => return code,
    };

    let to = if let Some(index) = to.strip_prefix("created:") {
        let index: usize = match index.parse() {
            Ok(index) => index,
            Err(_) => {
                eprintln!("{} bad created:N reference: {}", "error:".red(), to);
                return 2;
            }
        };
        match chain
            .receipts
            .get(index)
            .and_then(|r| r.created_contract_address.clone())
        {
            Some(address) => address,
            None => {
                eprintln!(
                    "{} transaction {} created no contract",
                    "error:".red(),
                    index
                );
                return 2;
            }
        }
    } else {
        to.to_string()
    };

    let args = match args {
        Some(text) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                eprintln!("{} --args is not valid JSON: {}", "error:".red(), err);
                return 2;
            }
        },
        None => serde_json::Value::Null,
    };

    let simulator = StaticCallSimulator::new(Arc::clone(&chain.engine));
    match simulator.static_call(&to, function, args, from) {
        Ok(Some(value)) => {
            println!("{}", value);
            0
        }
        Ok(None) => {
            println!("null");
            0
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red(), err);
            1
        }
    }
}
