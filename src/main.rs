//! otelbuild CLI entry point.
//!
//! Three ways in: `otelbuild go build ...` wraps the whole flow,
//! `otelbuild setup ...` runs the setup phase alone, and
//! `otelbuild toolexec ...` is what the build tool re-invokes per
//! sub-tool command once the wrapper installed it.

use clap::{Parser, Subcommand};

use otelbuild::common::paths;
use otelbuild::constants::BACKUP_FILES;
use otelbuild::debug_log;
use otelbuild::instrument::toolexec;
use otelbuild::setup::{self, SetupPhase};

const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "otelbuild")]
#[command(version)]
#[command(about = "Compile-time instrumentation for Go builds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the environment for instrumentation
    #[command(arg_required_else_help = true)]
    Setup {
        /// The original go build command, e.g. `go build ./cmd/app`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Sub-tool interception entry, invoked by the build tool
    #[command(arg_required_else_help = true)]
    Toolexec {
        /// The sub-tool invocation as given by the build tool
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Wrap a go build/install command with instrumentation
    #[command(name = "go", arg_required_else_help = true)]
    Go {
        /// The go subcommand and its arguments, e.g. `build ./cmd/app`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn run() -> Result<i32, String> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Setup { args } => {
            otelbuild::debug_log::init("setup");
            if let Err(e) = paths::backup_files(BACKUP_FILES) {
                eprintln!(
                    "[otelbuild] warning: failed to back up manifest files, proceeding despite this: {}",
                    e
                );
            }
            SetupPhase::new().setup(&args)?;
            Ok(0)
        }
        Commands::Toolexec { args } => {
            otelbuild::debug_log::init("toolexec");
            toolexec::toolexec(&args)
        }
        Commands::Go { args } => {
            otelbuild::debug_log::init("setup");
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push("go".to_string());
            full.extend(args.iter().cloned());
            setup::go_build(&full)
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("[otelbuild] error: {}", e);
            debug_log!("fatal: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
