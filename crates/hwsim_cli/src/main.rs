//! hwsim CLI: elaborate and simulate component designs.
//!
//! `hwsim check` loads a JSON design, validates it and elaborates the top
//! component. `hwsim run` does the same and then simulates it, driving the
//! clocks and inputs named in an `hwsim.toml` settings file.

#![warn(missing_docs)]

mod check;
mod pipeline;
mod run;

use std::process;

use clap::{Parser, Subcommand};

/// hwsim: a discrete-event simulator for component-based hardware models.
#[derive(Parser, Debug)]
#[command(name = "hwsim", version, about = "Hardware component simulator")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate and elaborate a design.
    Check(CheckArgs),
    /// Elaborate and simulate a design.
    Run(RunArgs),
}

/// Arguments for `hwsim check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Design file (JSON type table).
    pub design: String,

    /// Top component type. Inferred when the design has a single root.
    #[arg(long)]
    pub top: Option<String>,
}

/// Arguments for `hwsim run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Design file (JSON type table).
    pub design: String,

    /// Top component type. Overrides the settings file.
    #[arg(long)]
    pub top: Option<String>,

    /// Simulation time limit (e.g., "100ns", "1us").
    #[arg(long)]
    pub time: Option<String>,

    /// Print every signal change.
    #[arg(long)]
    pub trace: bool,

    /// Settings file, or a directory containing `hwsim.toml`.
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
}

fn init_logging(global: &GlobalArgs) {
    let default = if global.verbose {
        "debug"
    } else if global.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Check(ref args) => check::run(args, &global),
        Command::Run(ref args) => run::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check() {
        let cli = Cli::parse_from(["hwsim", "check", "design.json", "--top", "Soc"]);
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.design, "design.json");
                assert_eq!(args.top.as_deref(), Some("Soc"));
            }
            _ => panic!("expected Check command"),
        }
    }

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["hwsim", "run", "design.json"]);
        match cli.command {
            Command::Run(args) => {
                assert!(args.top.is_none());
                assert!(args.time.is_none());
                assert!(!args.trace);
                assert!(args.config.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parse_run_with_args() {
        let cli = Cli::parse_from([
            "hwsim",
            "-v",
            "run",
            "design.json",
            "--time",
            "1us",
            "--trace",
            "--config",
            "sim/hwsim.toml",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.time.as_deref(), Some("1us"));
                assert!(args.trace);
                assert_eq!(args.config.as_deref(), Some("sim/hwsim.toml"));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn global_quiet_after_subcommand() {
        let cli = Cli::parse_from(["hwsim", "check", "d.json", "-q"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
    }
}
