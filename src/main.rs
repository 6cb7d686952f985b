use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use advisor_core::AppError;
use advisor_core::api::{
    parse_body, project_request, rebalance_request, run_http_server, simulate_request,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "advisor-core",
    about = "Portfolio rebalancing, Monte Carlo retirement simulation and projections"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Serve the JSON API over HTTP")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    #[command(about = "Rebalance a portfolio and print the report")]
    Rebalance {
        #[arg(long, help = "Path to the request JSON, or - for stdin")]
        input: PathBuf,
    },
    #[command(about = "Run the retirement Monte Carlo simulation")]
    Simulate {
        #[arg(long, help = "Path to the request JSON, or - for stdin")]
        input: PathBuf,
    },
    #[command(about = "Print the deterministic yearly projection")]
    Project {
        #[arg(long, help = "Path to the request JSON, or - for stdin")]
        input: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("advisor_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(path: &Path) -> Result<Value, AppError> {
    let bytes = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf).map_err(|source| {
            AppError::ReadInput {
                path: path.to_path_buf(),
                source,
            }
        })?;
        buf
    } else {
        std::fs::read(path).map_err(|source| AppError::ReadInput {
            path: path.to_path_buf(),
            source,
        })?
    };
    parse_body(&bytes)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Serve { bind, port } => {
            run_http_server(SocketAddr::new(bind, port)).await?;
        }
        Command::Rebalance { input } => print_json(&rebalance_request(&read_input(&input)?))?,
        Command::Simulate { input } => print_json(&simulate_request(&read_input(&input)?))?,
        Command::Project { input } => print_json(&project_request(&read_input(&input)?))?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
