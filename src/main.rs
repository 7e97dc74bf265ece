// src/main.rs

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use rehome::{Error, EXIT_FAILED_ACTIONS, EXIT_VALIDATION};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Quiet by default; RUST_LOG opts in.
            EnvFilter::new("rehome=warn")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Capture {
            output,
            units,
            root,
            timeout,
        } => commands::capture_cmd(output, units, root, *timeout),
        Commands::Inspect { snapshot } => commands::inspect_cmd(snapshot),
        Commands::Normalize { snapshot, output } => commands::normalize_cmd(snapshot, output),
        Commands::Apply {
            model,
            roles,
            dry_run,
            root,
            report,
        } => commands::apply_cmd(model, roles, *dry_run, root, report.as_deref()),
        Commands::Verify {
            model,
            root,
            report,
        } => commands::verify_cmd(model, root, report.as_deref()),
        Commands::ListRoles { model } => commands::list_roles_cmd(model),
        Commands::ManualSteps { model, json } => commands::manual_steps_cmd(model, *json),
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<Error>() {
                Some(e) if e.is_validation() => EXIT_VALIDATION,
                _ => EXIT_FAILED_ACTIONS,
            }
        }
    };
    std::process::exit(code);
}
