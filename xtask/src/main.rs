use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

/// Lambda binaries of `page_watch_lambda`.
const LAMBDA_BINARIES: [&str; 3] = ["orchestrator_lambda", "monitor_lambda", "dispatcher_lambda"];

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the page watch workspace",
    long_about = "A unified CLI for running the poller locally and CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, orchestrator, monitor and dispatcher in one process
    Poll,
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build every Lambda binary without packaging
    Lambdas,
    /// Run check + lambdas
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test page_watch_core");
    run_cargo(&["test", "-p", "page_watch_core"]);

    step("Test page_watch_lambda");
    run_cargo(&["test", "-p", "page_watch_lambda"]);
}

fn ci_lambdas() {
    step("Build lambda binaries");
    run_cargo(&lambda_build_args());
}

fn lambda_build_args() -> Vec<&'static str> {
    let mut cargo_args = vec!["build", "-p", "page_watch_lambda"];
    for bin in LAMBDA_BINARIES {
        cargo_args.push("--bin");
        cargo_args.push(bin);
    }
    cargo_args
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Poll => {
            run_cargo(&[
                "run",
                "-p",
                "page_watch_lambda",
                "--bin",
                "poller_runtime",
            ]);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Lambdas => ci_lambdas(),
                CiJob::All => {
                    ci_check();
                    ci_lambdas();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
