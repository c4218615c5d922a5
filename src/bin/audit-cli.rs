use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use audit_paygate::blockchain::{BlockchainClient, Wallet};
use audit_paygate::client::{run_paid_audit, ApiClient};
use audit_paygate::config::{BlockchainConfig, FlowConfig, TrackerConfig};
use audit_paygate::flow::PaymentFlow;
use audit_paygate::gateway::Admission;
use audit_paygate::observability::init_tracing;
use audit_paygate::signer::{LocalKeySigner, WalletSigner};
use audit_paygate::tracker::{ProgressTracker, TrackerEvent, TrackerRegistry};

#[derive(Parser)]
#[command(name = "audit-cli")]
#[command(about = "Client for the payment-gated analysis API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Bearer key for admin endpoints.
    #[arg(short, long, env = "PAYGATE_ADMIN_KEY")]
    key: Option<String>,

    /// JSON-RPC endpoint used to sign and broadcast payments.
    #[arg(long, default_value = "http://localhost:8545")]
    rpc_url: String,

    #[arg(long, default_value_t = 9745)]
    chain_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a URL for analysis, optionally with a paid invoice
    Analyze {
        target: String,
        #[arg(long)]
        invoice: Option<Uuid>,
    },
    /// Create or inspect invoices
    Invoice {
        #[command(subcommand)]
        command: InvoiceCommands,
    },
    /// Show the current progress of an analysis
    Progress { job_id: Uuid },
    /// Follow an analysis until it finishes
    Watch { job_id: Uuid },
    /// Fetch the report of a completed analysis
    Report { job_id: Uuid },
    /// Pay a fresh invoice with the local key and wait for confirmation
    Pay,
    /// Submit, pay if challenged, track and print the report
    Audit { target: String },
    /// Query an admin endpoint (status, summary)
    Admin { path: String },
}

#[derive(Subcommand)]
enum InvoiceCommands {
    /// Create an invoice for a payer address
    Create { payer: String },
    /// Show an invoice
    Status { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing("warn");

    let mut client = ApiClient::new(&cli.url)?;
    if let Some(key) = &cli.key {
        client = client.with_admin_key(key.clone());
    }
    let client = Arc::new(client);

    match cli.command {
        Commands::Analyze { target, invoice } => match client.submit(&target, invoice).await? {
            Admission::Admitted { job_id, status } => {
                println!("admitted: job {} ({})", job_id, status);
            }
            Admission::PaymentRequired(challenge) => {
                println!("payment required:");
                print_json(&serde_json::to_value(&challenge)?)?;
            }
        },
        Commands::Invoice { command } => match command {
            InvoiceCommands::Create { payer } => {
                let invoice = client.create_invoice(payer.parse()?).await?;
                print_json(&serde_json::to_value(&invoice)?)?;
            }
            InvoiceCommands::Status { id } => {
                let invoice = client.invoice(id).await?;
                print_json(&serde_json::to_value(&invoice)?)?;
            }
        },
        Commands::Progress { job_id } => {
            let progress = client.progress(job_id).await?;
            print_json(&serde_json::to_value(&progress)?)?;
        }
        Commands::Watch { job_id } => {
            let tracker = Arc::new(ProgressTracker::new(client.clone(), &TrackerConfig::default()));
            let registry = TrackerRegistry::new(tracker);
            if let Some(mut events) = registry.start(job_id) {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                    if event.is_final() {
                        break;
                    }
                }
            }
            registry.stop_all();
        }
        Commands::Report { job_id } => {
            print_json(&client.report(job_id).await?)?;
        }
        Commands::Pay => {
            let signer = local_signer(&cli.rpc_url, cli.chain_id).await?;
            let mut flow = PaymentFlow::from_config(client.clone(), signer, &FlowConfig::default());
            let invoice_id = flow.run().await?;
            println!("invoice {} confirmed", invoice_id);
        }
        Commands::Audit { target } => {
            let signer = local_signer(&cli.rpc_url, cli.chain_id).await?;
            let outcome = run_paid_audit(
                client.clone(),
                signer,
                &target,
                &FlowConfig::default(),
                &TrackerConfig::default(),
                print_event,
            )
            .await?;
            if let Some(invoice_id) = outcome.invoice_id {
                println!("paid with invoice {}", invoice_id);
            }
            println!("report for job {}:", outcome.job_id);
            print_json(&outcome.report)?;
        }
        Commands::Admin { path } => {
            print_json(&client.admin(&path).await?)?;
        }
    }

    Ok(())
}

async fn local_signer(rpc_url: &str, chain_id: u64) -> Result<Arc<dyn WalletSigner>, Box<dyn std::error::Error>> {
    let config = BlockchainConfig {
        rpc_url: rpc_url.to_string(),
        chain_id,
        ..BlockchainConfig::default()
    };
    let client = BlockchainClient::new(config).await?;
    let wallet = Wallet::from_env(chain_id)?;
    Ok(Arc::new(LocalKeySigner::new(client, wallet)?))
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Progress(p) => println!("[{:>3}%] {}", p.completion_percentage, p.status),
        TrackerEvent::Completed(p) => println!("[{:>3}%] completed", p.completion_percentage),
        TrackerEvent::Failed(p) => println!("[{:>3}%] failed", p.completion_percentage),
        TrackerEvent::NotFound(id) => eprintln!("job {} not found", id),
        TrackerEvent::Error(message) => eprintln!("tracking error: {}", message),
    }
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
