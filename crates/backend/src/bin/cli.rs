use clap::{Parser, Subcommand};
use reqwest::Client;
use shared_types::{ConnectionResponse, SyncRequest, SyncRunResponse};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dealflow-cli")]
#[command(about = "CLI for managing dealflow connections and sync runs")]
#[command(
    long_about = "A command-line interface for the dealflow backend.\n\n\
    Lists and disconnects provider connections, queues sync runs, and\n\
    inspects sync history. Authenticates with a session JWT passed as a\n\
    bearer token."
)]
struct Cli {
    /// Backend server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "DEALFLOW_API_URL"
    )]
    base_url: String,

    /// Session token for protected endpoints.
    ///
    /// Obtain one by signing in through the web app; the value of the
    /// session cookie works here.
    #[arg(short, long, env = "DEALFLOW_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage provider connections
    Connections {
        #[command(subcommand)]
        action: ConnectionAction,
    },
    /// Queue and inspect sync runs
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum ConnectionAction {
    /// List an account's connected providers
    List {
        /// Account slug (e.g. "acc1").
        #[arg(short, long, value_name = "ACCOUNT")]
        account: String,
    },

    /// Disconnect a provider connection
    ///
    /// Deletes the stored tokens. Already-synced emails and events are kept.
    Disconnect {
        /// The UUID of the connection to remove.
        /// Use 'connections list' to find it.
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Queue a sync run for an account
    Run {
        /// Account slug to sync.
        #[arg(short, long, value_name = "ACCOUNT")]
        account: String,

        /// Restrict the run to one connected mailbox.
        #[arg(short, long, value_name = "EMAIL")]
        email: Option<String>,
    },

    /// Show recent sync runs, newest first
    Status {
        /// Account slug.
        #[arg(short, long, value_name = "ACCOUNT")]
        account: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Connections { action } => {
            handle_connections(&client, &cli.base_url, cli.token.as_deref(), action).await?
        }
        Commands::Sync { action } => {
            handle_sync(&client, &cli.base_url, cli.token.as_deref(), action).await?
        }
    }

    Ok(())
}

fn with_auth(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(t) => request.bearer_auth(t),
        None => request,
    }
}

async fn handle_connections(
    client: &Client,
    base_url: &str,
    token: Option<&str>,
    action: ConnectionAction,
) -> anyhow::Result<()> {
    let url = format!("{}/api/connections", base_url);

    match action {
        ConnectionAction::List { account } => {
            let connections: Vec<ConnectionResponse> = with_auth(
                client.get(&url).query(&[("account_id", account.as_str())]),
                token,
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

            if connections.is_empty() {
                println!("No connections for account {}.", account);
            } else {
                for conn in connections {
                    let active = if conn.is_active { "●" } else { "○" };
                    println!(
                        "{} [{}] {:<11} {} ({})",
                        active,
                        &conn.id.to_string()[..8],
                        conn.provider,
                        conn.email_address,
                        conn.sync_status
                    );
                    if let Some(last) = conn.last_synced {
                        println!("    Last synced: {}", last);
                    }
                }
            }
        }
        ConnectionAction::Disconnect { id } => {
            with_auth(client.delete(format!("{}/{}", url, id)), token)
                .send()
                .await?
                .error_for_status()?;
            println!("Disconnected: {}", id);
        }
    }

    Ok(())
}

async fn handle_sync(
    client: &Client,
    base_url: &str,
    token: Option<&str>,
    action: SyncAction,
) -> anyhow::Result<()> {
    match action {
        SyncAction::Run { account, email } => {
            let request = SyncRequest {
                account_id: account.clone(),
                email,
            };
            with_auth(client.post(format!("{}/api/sync", base_url)), token)
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            println!("Sync queued for account {}.", account);
            println!("Check progress with: dealflow-cli sync status --account {}", account);
        }
        SyncAction::Status { account } => {
            let runs: Vec<SyncRunResponse> = with_auth(
                client
                    .get(format!("{}/api/sync/status", base_url))
                    .query(&[("account_id", account.as_str())]),
                token,
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

            if runs.is_empty() {
                println!("No sync runs for account {}.", account);
            } else {
                for run in runs {
                    println!(
                        "[{}] {:<11} {:<12} emails={} events={} started={}",
                        &run.id.to_string()[..8],
                        run.provider,
                        run.status,
                        run.emails_synced,
                        run.events_synced,
                        run.started_at
                    );
                    if let Some(error) = &run.error_message {
                        println!("    Error: {}", error);
                    }
                }
            }
        }
    }

    Ok(())
}
