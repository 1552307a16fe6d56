use clap::Parser;
use minibank::basic::MemoryLedger;
use minibank::libcsv::{dump_accounts, execute_csv_file, validate_accounts_file, ExecError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Default, Debug)]
struct Arguments {
    /// CSV file containing banking operations
    input_file: PathBuf,

    /// CSV file with expected account states, checked instead of dumping
    #[clap(long)]
    validate: Option<PathBuf>,

    /// Log verbosity, repeat for more (overridden by RUST_LOG)
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), ExecError> {
    let args = Arguments::parse();
    init_tracing(args.verbose);
    let mut ledger = MemoryLedger::new();
    execute_csv_file(&args.input_file, &mut ledger)?;
    match args.validate {
        Some(path) => validate_accounts_file(path, &ledger),
        None => dump_accounts(std::io::stdout(), &ledger),
    }
}
