use clap::Parser;
use crossmatrix::cli::Cli;
use dirs::config_dir;
use env_logger::Builder;
use log::LevelFilter;
use std::fs::OpenOptions;

/** Entry point of the crossmatrix binary
 *
 * # Process Flow
 * 1. Parse command line arguments using Clap
 * 2. Initialize file logging (debug level with `--verbose`)
 * 3. Execute the requested command
 * 4. Exit with the command's status
 *
 * # Exit Codes
 * - `0`: every requested output was produced
 * - `1`: at least one combination failed
 * - `2`: invalid configuration, manifest or arguments; nothing was built
 */
#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(e.exit_code());
        }
    };

    init_logging(cli.verbose());

    let code = match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };

    log::info!("crossmatrix exiting with status {}", code);
    std::process::exit(code);
}

/** Initializes the logging system with file-based output
 *
 * # Configuration
 * - Log file location: platform-specific config directory
 * - Log level: Info and above, Debug with `--verbose`; `RUST_LOG` still applies
 * - Output: Append mode to preserve historical logs
 *
 * # Notes
 * - Logging failures are non-fatal; the run continues without a log file
 */
fn init_logging(verbose: bool) {
    let log_file = get_log_file_path();

    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let file = match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => file,
        Err(_) => return,
    };

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .filter_level(level)
        .try_init();

    log::info!("crossmatrix {} started", env!("CARGO_PKG_VERSION"));
}

/// `<config dir>/crossmatrix/crossmatrix.log`, or the working directory as fallback.
fn get_log_file_path() -> std::path::PathBuf {
    if let Some(config_dir) = config_dir() {
        config_dir.join("crossmatrix").join("crossmatrix.log")
    } else {
        std::env::current_dir()
            .map(|p| p.join("crossmatrix.log"))
            .unwrap_or_else(|_| "crossmatrix.log".into())
    }
}
