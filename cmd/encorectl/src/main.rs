use clap::{Parser, Subcommand};
use pkg_constants::defaults::DEFAULT_CONFIG_PATH;
use pkg_types::config::load_ha_config;
use pkg_types::lease::{HealthStatus, LeaderInfo};
use pkg_types::playback::{CheckpointSummary, PlaybackCheckpoint};
use reqwest::StatusCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "encorectl", about = "Inspect and operate encore's HA failover")]
struct Cli {
    /// HA API endpoint of any instance
    #[arg(long, env = "ENCORE_API", default_value = "http://127.0.0.1:8090")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show this instance's role and the current leader
    Status,
    /// Inspect stored playback checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    /// Resolve and validate HA configuration locally
    Config {
        /// YAML config file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List all checkpoints
    List,
    /// Print one checkpoint as JSON
    Show { key: String },
    /// Delete a checkpoint so the session is never restored
    Drop { key: String },
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), path)
}

fn fail(status: StatusCode) -> ! {
    eprintln!("Error: server returned {}", status);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match &cli.command {
        Commands::Status => {
            info!("Querying HA status from {}", cli.server);
            let resp = client.get(endpoint(&cli.server, "/healthz")).send().await?;
            if !resp.status().is_success() {
                fail(resp.status());
            }
            let health: HealthStatus = resp.json().await?;

            let resp = client
                .get(endpoint(&cli.server, "/api/v1/ha/leader"))
                .send()
                .await?;
            if !resp.status().is_success() {
                fail(resp.status());
            }
            let leader: LeaderInfo = resp.json().await?;

            println!("Instance:        {}", health.instance_id);
            println!("HA Enabled:      {}", health.ha_enabled);
            println!("Store:           {}", health.store);
            println!("Is Leader:       {}", health.is_leader);
            println!(
                "Leader:          {}",
                leader.leader_id.as_deref().unwrap_or("(none)")
            );
            if let Some(at) = leader.last_heartbeat {
                println!("Last Heartbeat:  {}", at.format("%Y-%m-%d %H:%M:%S%.3f"));
            }
        }
        Commands::Checkpoints { action } => match action {
            CheckpointAction::List => {
                let resp = client
                    .get(endpoint(&cli.server, "/api/v1/ha/checkpoints"))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let rows: Vec<CheckpointSummary> = resp.json().await?;

                println!(
                    "{:<22} {:<32} {:>10} {:>6} {:<7} {}",
                    "SESSION", "CURRENT", "POSITION", "QUEUE", "PAUSED", "SAVED"
                );
                for row in &rows {
                    let mut title = row.current_title.clone().unwrap_or_else(|| "-".to_string());
                    if title.chars().count() > 30 {
                        title = title.chars().take(27).collect::<String>() + "...";
                    }
                    println!(
                        "{:<22} {:<32} {:>10} {:>6} {:<7} {}",
                        row.session_key,
                        title,
                        row.position_ms
                            .map(|ms| format!("{}s", ms / 1000))
                            .unwrap_or_else(|| "-".to_string()),
                        row.queue_len,
                        row.paused,
                        row.saved_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                if rows.is_empty() {
                    println!("(no checkpoints)");
                }
            }
            CheckpointAction::Show { key } => {
                let url = endpoint(&cli.server, &format!("/api/v1/ha/checkpoints/{}", key));
                let resp = client.get(&url).send().await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    eprintln!("No checkpoint for {}", key);
                    std::process::exit(1);
                }
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let checkpoint: PlaybackCheckpoint = resp.json().await?;
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
            }
            CheckpointAction::Drop { key } => {
                let url = endpoint(&cli.server, &format!("/api/v1/ha/checkpoints/{}", key));
                let resp = client.delete(&url).send().await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                println!("Dropped checkpoint {}", key);
            }
        },
        Commands::Config { config } => {
            let resolved = load_ha_config(config)?;
            println!("Enabled:             {}", resolved.enabled);
            println!("Instance:            {}", resolved.instance_id);
            println!("Store:               {}", resolved.store);
            println!(
                "Heartbeat / TTL:     {}ms / {}ms",
                resolved.heartbeat_interval.as_millis(),
                resolved.lease_ttl.as_millis()
            );
            println!(
                "Checkpoint / TTL:    {}ms / {}ms",
                resolved.checkpoint_interval.as_millis(),
                resolved.checkpoint_ttl.as_millis()
            );
            println!(
                "Seek Delay:          {}ms",
                resolved.restore_seek_delay.as_millis()
            );
            println!("API Port:            {}", resolved.api_port);
        }
    }

    Ok(())
}
