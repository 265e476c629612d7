//! Tapestry command-line tool
//!
//! Author-side front end for weave packages: check a package against the
//! classes it targets, weave a directory of classes, dump a class file.

mod classpath;
mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tapestry")]
#[command(about = "Load-time weaving toolkit for JVM classes", long_about = None)]
#[command(version)]
struct Cli {
    /// Color output: auto, always or never
    #[arg(long, global = true)]
    color: Option<String>,

    /// Log weaving decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a weave package against compiled classes
    Check {
        /// Package directory containing weave.toml
        package: PathBuf,
        /// Directory of compiled classes the package targets
        #[arg(short, long)]
        classpath: PathBuf,
        /// Print the validation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Weave every class in a directory and write the results
    Weave {
        /// Package directories, in any order
        #[arg(short, long = "package", required = true)]
        packages: Vec<PathBuf>,
        /// Directory of compiled classes to weave
        #[arg(short, long)]
        classpath: PathBuf,
        /// Output directory for woven classes
        #[arg(short, long, default_value = "woven")]
        out_dir: PathBuf,
        /// Print the weave reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the structure of a class file
    Dump {
        /// Class file
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TAPESTRY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut out = output::StyledOutput::new(output::resolve_color_choice(cli.color.as_deref()));

    let result = match cli.command {
        Commands::Check {
            package,
            classpath,
            json,
        } => commands::check::execute(&package, &classpath, json, &mut out),

        Commands::Weave {
            packages,
            classpath,
            out_dir,
            json,
        } => commands::weave::execute(
            commands::weave::WeaveOptions {
                packages,
                classpath,
                out_dir,
                json,
            },
            &mut out,
        ),

        Commands::Dump { file, json } => commands::dump::execute(&file, json, &mut out),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            out.stderr_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    }
}
