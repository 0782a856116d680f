// File: src/main.rs
//
// Main entry point for the breakall command line tool.
// Handles command-line argument parsing and dispatches to the appropriate
// subcommand (run, rewrite, or check).

use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use breakall::driver::{read_source, rewrite_source, run_file, RunOptions};
use breakall::unparse::unparse_module;
use breakall::{Error, Interpreter, RewriteOptions};

#[derive(ClapParser)]
#[command(
    name = "breakall",
    about = "Break from multiple loops at once",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Rewrite a script and run it
    Run {
        /// The file to run
        file: PathBuf,

        /// Also write the rewritten source to this file (`-` for stdout)
        #[arg(long)]
        output: Option<String>,

        /// Rewrite every module the script imports as well
        #[arg(long)]
        trace: bool,

        /// Additional directories searched by `import`
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<PathBuf>,
    },

    /// Print the rewritten script without running it
    Rewrite {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Source)]
        format: Format,
    },

    /// Report breakall diagnostics without running the script
    Check { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Source,
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("BREAKALL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", error.report());
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Run { file, output, trace, include } => {
            let options = RunOptions { output, trace, search_paths: include, ..Default::default() };
            let mut interpreter = Interpreter::new();
            run_file(&mut interpreter, &file, &options)
        }

        Commands::Rewrite { file, format } => {
            let module = rewrite_file(&file)?;
            match format {
                Format::Source => println!("{}", unparse_module(&module)),
                Format::Json => {
                    let json = serde_json::to_string_pretty(&module)
                        .map_err(|e| Error::Io { path: file.display().to_string(), reason: e.to_string() })?;
                    println!("{}", json);
                }
            }
            Ok(())
        }

        Commands::Check { file } => {
            rewrite_file(&file)?;
            println!("{}: no breakall problems found", file.display());
            Ok(())
        }
    }
}

fn rewrite_file(file: &Path) -> Result<breakall::ast::Module, Error> {
    let source = read_source(file)?;
    rewrite_source(&source, &RewriteOptions::new(&file.display().to_string()))
}
