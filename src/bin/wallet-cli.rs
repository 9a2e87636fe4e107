use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "wallet-cli")]
#[command(about = "Operator CLI for the chain orchestrator admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "ORCHESTRATOR_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status and network health
    Status,
    /// Last known balances
    Balances,
    /// Tracked transactions and their states
    Transactions,
    /// Nonce bookkeeping per sender
    Nonces,
    /// Current fee quotes for a network
    Fees {
        /// Chain ID to quote
        chain_id: u64,
    },
}

impl Commands {
    fn path(&self) -> String {
        match self {
            Commands::Status => "/admin/status".to_string(),
            Commands::Balances => "/admin/balances".to_string(),
            Commands::Transactions => "/admin/transactions".to_string(),
            Commands::Nonces => "/admin/nonces".to_string(),
            Commands::Fees { chain_id } => format!("/admin/fees/{}", chain_id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let url = format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path());
    let res = client.get(url).headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
