//! Convoy CLI - deploy Kubernetes manifests to many clusters at once

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::deploy::DeployArgs;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(version)]
#[command(about = "Deploy Kubernetes manifests to many clusters at once", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy manifests to every cluster matching --clusters
    Deploy(Box<DeployArgs>),
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Deploy(args) => commands::deploy::run(*args, cli.debug).await,
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Deploy progress is rendered from the event stream, so library logs stay quiet unless asked for
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn,convoy_kube=off" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_subcommand_parses() {
        let cli = Cli::try_parse_from(["convoy", "--debug", "deploy", "--clusters", "c/*.yaml"]).unwrap();
        assert!(cli.debug);
        let Commands::Deploy(args) = cli.command;
        assert_eq!(args.clusters, "c/*.yaml");
        assert!(!args.apply);
    }

    #[test]
    fn test_missing_subcommand_is_usage_error() {
        let err = Cli::try_parse_from(["convoy"]).err().unwrap();
        assert!(err.use_stderr());
    }
}
