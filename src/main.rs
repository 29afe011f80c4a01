// # Replicated Concurrency-Control Engine
//
// Command-line entry point: reads a command file line by line, dispatching
// each line to a `TransactionManager`. See `--help` for flags.

use std::fs;
use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rce::engine::dispatcher;
use rce::{EngineConfig, RceError, Result, TransactionManager, VERSION};

struct Args {
    path: Option<String>,
    verbose: bool,
    quiet: bool,
}

fn parse_args() -> Args {
    let mut path = None;
    let mut verbose = false;
    let mut quiet = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-q" | "--quiet" => quiet = true,
            other => path = Some(other.to_string()),
        }
    }

    Args {
        path,
        verbose,
        quiet,
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .init();
}

fn run() -> Result<()> {
    let args = parse_args();
    init_logging(args.verbose, args.quiet);
    info!(version = VERSION, "starting rce");

    let path = args.path.ok_or(RceError::MissingInputFile)?;
    let contents = fs::read_to_string(&path).map_err(|source| RceError::CommandFile {
        path: path.clone(),
        source,
    })?;

    let config = EngineConfig::default();
    let mut manager = TransactionManager::new(config);

    for (lineno, line) in contents.lines().enumerate() {
        let tokens = dispatcher::tokenize(line);
        if tokens.is_empty() {
            continue;
        }
        match dispatcher::parse(&tokens, config.site_count) {
            Some(command) => manager.dispatch(command),
            None => warn!(line = lineno + 1, text = line, "skipping unparseable line"),
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal error");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
