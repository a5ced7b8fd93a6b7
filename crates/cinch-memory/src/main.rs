//! Compact a conversation history from the command line.
//!
//! Reads a JSON array of messages, reduces it to fit the configured budget
//! and writes the result to stdout. Logs go to stderr, filtered by
//! `RUST_LOG` (default `warn`).
//!
//! # Examples
//!
//! ```sh
//! # Compact a saved history against a 20k-token budget
//! cinch-memory --input history.json --max-tokens 20000 --report
//!
//! # Derive the budget from the model's output limit and keep the summary
//! cat history.json | cinch-memory --stdin --output-limit 4096 \
//!     --session th-abc123 --store-dir ~/.cinch/memory
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use cinch_memory::{
    FileMidTermStore, MemoryConfig, MemoryManager, PersistenceBridge, deserialize_state,
    serialize_state,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Compact a conversation history to fit a token budget.
#[derive(Parser)]
#[command(name = "cinch-memory", version)]
struct Cli {
    /// JSON file holding the message history.
    #[arg(long, conflicts_with = "stdin", required_unless_present = "stdin")]
    input: Option<PathBuf>,

    /// Read the message history from stdin.
    #[arg(long)]
    stdin: bool,

    /// Input budget in tokens, before the reserve is withheld.
    #[arg(
        long,
        env = "CINCH_MEMORY_MAX_TOKENS",
        conflicts_with = "output_limit",
        allow_negative_numbers = true
    )]
    max_tokens: Option<i64>,

    /// Model output limit; the input budget is derived from it.
    #[arg(long, env = "CINCH_MEMORY_OUTPUT_LIMIT", allow_negative_numbers = true)]
    output_limit: Option<i64>,

    /// Recent messages kept verbatim by tier compaction.
    #[arg(long, default_value_t = 5)]
    short_term: usize,

    /// Percentage of the budget withheld for the response.
    #[arg(long, default_value_t = 20)]
    reserve_percent: i64,

    /// Characters per estimated token.
    #[arg(long, default_value_t = 3.0)]
    chars_per_token: f64,

    /// Session receiving the generated summary.
    #[arg(long, requires = "store_dir")]
    session: Option<String>,

    /// Directory of the file-backed mid-term memory store.
    #[arg(long, env = "CINCH_MEMORY_STORE_DIR", requires = "session")]
    store_dir: Option<PathBuf>,

    /// Print the compaction report to stderr.
    #[arg(long)]
    report: bool,

    /// Pretty-print the output JSON.
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn memory_config(&self) -> MemoryConfig {
        let base = match self.output_limit {
            Some(limit) => MemoryConfig::for_output_limit(limit),
            None => MemoryConfig::default(),
        };
        let max_tokens = self
            .max_tokens
            .filter(|&t| t > 0)
            .unwrap_or_else(|| i64::try_from(base.max_tokens).unwrap_or(i64::MAX));
        MemoryConfig::new(
            max_tokens,
            self.short_term,
            self.reserve_percent,
            self.chars_per_token,
        )
    }

    fn read_history(&self) -> Result<String, String> {
        match &self.input {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display())),
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .map_err(|e| format!("failed to read stdin: {e}"))?;
                Ok(buf)
            }
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = cli.memory_config();
    let history = deserialize_state(&cli.read_history()?).map_err(|e| e.to_string())?;

    let mut manager = MemoryManager::new();
    if let (Some(session), Some(dir)) = (&cli.session, &cli.store_dir) {
        let store = FileMidTermStore::new(dir)
            .map_err(|e| format!("failed to open store {}: {e}", dir.display()))?;
        manager = manager.with_persistence(PersistenceBridge::new(Arc::new(store), session));
    }

    let (compacted, report) = manager
        .manage_with_report(history, &config)
        .map_err(|e| e.to_string())?;

    if cli.report {
        eprintln!("{}", report.to_log_string());
        for (stage, tokens) in &report.stage_tokens {
            eprintln!("  {stage}: ~{tokens} tokens");
        }
    }

    let json = if cli.pretty {
        serde_json::to_string_pretty(&compacted).map_err(|e| e.to_string())?
    } else {
        serialize_state(&compacted).map_err(|e| e.to_string())?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").map_err(|e| format!("failed to write output: {e}"))
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
