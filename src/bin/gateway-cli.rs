use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the pattern gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an inference request
    Submit {
        /// Backend id
        backend: String,
        /// JSON payload (plain text is sent as a JSON string)
        payload: String,
        #[arg(long)]
        urgent: bool,
        /// Wait for a batched result instead of taking a poll handle
        #[arg(long)]
        wait: bool,
    },
    /// Poll a queued request
    Poll { request_id: String },
    /// Cancel a queued request before its batch is submitted
    Cancel { request_id: String },
    /// List registered backends
    Backends,
    /// Show circuit breaker states
    Circuits,
    /// Show gateway status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Submit {
            backend,
            payload,
            urgent,
            wait,
        } => {
            let payload = serde_json::from_str::<Value>(&payload).unwrap_or(Value::String(payload));
            client
                .post(format!("{base}/v1/infer"))
                .json(&json!({
                    "backend_id": backend,
                    "payload": payload,
                    "urgent": urgent,
                    "wait": wait,
                }))
                .send()
                .await?
        }
        Commands::Poll { request_id } => client.get(format!("{base}/v1/requests/{request_id}")).send().await?,
        Commands::Cancel { request_id } => {
            client
                .delete(format!("{base}/v1/requests/{request_id}"))
                .send()
                .await?
        }
        Commands::Backends => client.get(format!("{base}/admin/backends")).send().await?,
        Commands::Circuits => client.get(format!("{base}/admin/circuits")).send().await?,
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .and_then(|json| serde_json::to_string_pretty(&json))
        .unwrap_or(text);

    if status.is_success() {
        if status.as_u16() == 202 {
            eprintln!("Accepted (202)");
        }
        println!("{body}");
    } else {
        eprintln!("Error: gateway returned status {status}");
        eprintln!("{body}");
        std::process::exit(1);
    }
    Ok(())
}
