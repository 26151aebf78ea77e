//! Marketplace CLI - wire protocol client and database migrations.
//!
//! # Usage
//!
//! ```bash
//! # Create an account and log in; login prints the token
//! mkt buyer create -n "Ada" -u ada -p password123
//! mkt buyer login -u ada -p password123
//!
//! # Reuse the token for later commands
//! export MARKET_SESSION=<token>
//! mkt buyer search -c 3 -k mug
//! mkt buyer add <product-id> 2
//! mkt buyer checkout -n "Ada" -c 4111111111111111 -e 12/29
//!
//! # Run database migrations
//! mkt migrate
//! ```
//!
//! # Commands
//!
//! - `buyer` - Buyer commands (`B0`-`B13`)
//! - `seller` - Seller commands (`S0`-`S9`)
//! - `migrate` - Run database migrations

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use marketplace_cli::MarketClient;
use marketplace_core::SessionToken;

mod commands;

use commands::{buyer::BuyerAction, seller::SellerAction};

#[derive(Parser)]
#[command(name = "mkt")]
#[command(author, version, about = "Marketplace command-line client")]
struct Cli {
    /// Server wire protocol address
    #[arg(long, global = true, env = "MARKET_ADDR", default_value = "127.0.0.1:50000")]
    addr: String,

    /// Session token from an earlier login
    #[arg(long, global = true, env = "MARKET_SESSION")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Buyer commands
    Buyer {
        #[command(subcommand)]
        action: BuyerAction,
    },
    /// Seller commands
    Seller {
        #[command(subcommand)]
        action: SellerAction,
    },
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketplace_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            tracing::error!("Command failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the server reported success.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let (command, payload) = match cli.command {
        Commands::Migrate => {
            commands::migrate::run().await?;
            return Ok(true);
        }
        Commands::Buyer { action } => action.into_request()?,
        Commands::Seller { action } => action.into_request()?,
    };

    let mut client = MarketClient::connect(cli.addr.as_str())
        .await?
        .with_token(cli.token.map(SessionToken::from));
    let response = client.send(command, payload).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(response.is_ok())
}
