use clap::{Parser, Subcommand};
use recheck::{logging, spawn_reader, Checker, Config, FormatterKind, StdoutSink};
use std::path::PathBuf;
use std::sync::Arc;

const INBOUND_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "recheck")]
#[command(about = "Re-checks changed files with tsc and eslint and reports consolidated issue lists")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the checker. Change notifications are read from stdin as JSON lines
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Project directory to check
        #[arg(long)]
        context: Option<PathBuf>,

        /// Check once and exit instead of watching stdin
        #[arg(long)]
        once: bool,

        /// Output format for issue lists
        #[arg(long, value_enum)]
        format: Option<FormatterKind>,
    },
    /// Generate a default configuration file
    Config {
        /// Output path for the config file (defaults to ~/.recheck.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, context, once, format } => {
            let has_errors = run_checker(config, context, once, format).await?;
            if has_errors {
                std::process::exit(1);
            }
        }
        Commands::Config { output } => {
            generate_config(output)?;
        }
    }

    Ok(())
}

/// Returns whether a one-shot run reported any errors.
async fn run_checker(
    config_path: Option<PathBuf>,
    context: Option<PathBuf>,
    once: bool,
    format: Option<FormatterKind>,
) -> anyhow::Result<bool> {
    let mut config = if let Some(config_path) = config_path {
        Config::from_file(&config_path)?
    } else {
        Config::load()?
    };

    // Command line flags win over the file
    if let Some(context) = context {
        config.context = context;
    }
    if once {
        config.watch = false;
    }
    if let Some(format) = format {
        config.formatter.kind = format;
    }

    logging::init(&config.logger)?;

    let sink = Arc::new(StdoutSink::new(config.formatter.kind));
    let watching = config.watch;
    let checker = Checker::new(config, sink)?;

    if watching {
        let inbound = spawn_reader(tokio::io::stdin(), INBOUND_CAPACITY);
        checker.main(Some(inbound)).await?;
        return Ok(false);
    }

    let delivered = checker.main(None).await?;
    Ok(delivered.is_some_and(|message| message.has_errors()))
}

fn generate_config(output_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = output_path
        .unwrap_or_else(|| Config::default_config_path().unwrap_or_else(|_| PathBuf::from("recheck.toml")));

    println!("Generating configuration file: {}", config_path.display());

    // Write the documented config instead of the bare defaults
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, Config::create_documented_config())?;

    println!("Configuration file created successfully!");
    println!("Key configuration areas:");
    println!("  - async: watch stdin for changes or check once");
    println!("  - [typescript] and [eslint] analyzer settings");
    println!("  - [issue] include/exclude rules");
    println!("  - [formatter], [logger] and [pool] options");

    Ok(())
}
