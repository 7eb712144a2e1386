use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use reqwest::Client;

use murmur::client::{CoordinationClient, Publication, RelayPublisher, RelaySubscriber};
use murmur::coordination::LogicalClock;

#[derive(Parser)]
#[command(name = "murmur-admin")]
#[command(about = "Murmur coordinator and relay administration tool")]
struct Cli {
    /// Request timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a server identity and print its rank
    Rank {
        /// Coordinator address (e.g., "127.0.0.1:5559")
        #[arg(long, default_value = "127.0.0.1:5559")]
        coordinator: SocketAddr,
        /// Server identity; a random bot name when omitted
        #[arg(long)]
        identity: Option<String>,
    },
    /// Send one heartbeat for a server identity
    Heartbeat {
        #[arg(long, default_value = "127.0.0.1:5559")]
        coordinator: SocketAddr,
        #[arg(long)]
        identity: String,
    },
    /// List active servers
    List {
        #[arg(long, default_value = "127.0.0.1:5559")]
        coordinator: SocketAddr,
    },
    /// Publish one chat message through the relay
    Publish {
        /// Relay publish side (e.g., "127.0.0.1:5557")
        #[arg(long, default_value = "127.0.0.1:5557")]
        relay: SocketAddr,
        #[arg(long, default_value = "chat")]
        topic: String,
        #[arg(long, default_value = "murmur-admin")]
        user: String,
        message: String,
    },
    /// Print messages from the relay until interrupted
    Subscribe {
        /// Relay subscribe side (e.g., "127.0.0.1:5558")
        #[arg(long, default_value = "127.0.0.1:5558")]
        relay: SocketAddr,
        /// Topic prefix; empty receives everything
        #[arg(long, default_value = "")]
        topic: String,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
    /// Check coordinator HTTP status APIs
    Health {
        /// Nodes to check (e.g., "127.0.0.1:8559,127.0.0.1:8560")
        #[arg(long)]
        nodes: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Rank {
            coordinator,
            identity,
        } => {
            let identity = identity.unwrap_or_else(random_identity);
            let mut client = CoordinationClient::new(coordinator, timeout);
            let rank = client.rank(&identity).await?;
            println!("{} has rank {} (clock {})", identity, rank, client.clock().current());
        }
        Commands::Heartbeat {
            coordinator,
            identity,
        } => {
            let mut client = CoordinationClient::new(coordinator, timeout);
            client.heartbeat(&identity).await?;
            println!("Heartbeat for {} acknowledged", identity);
        }
        Commands::List { coordinator } => {
            let mut client = CoordinationClient::new(coordinator, timeout);
            let servers = client.list().await?;
            if servers.is_empty() {
                println!("No active servers");
            }
            for server in servers {
                println!("{:>6}  {}", server.rank, server.identity);
            }
        }
        Commands::Publish {
            relay,
            topic,
            user,
            message,
        } => {
            let clock = LogicalClock::new();
            let publication = Publication::stamped(user, message, &clock);
            let mut publisher = RelayPublisher::connect(relay, timeout).await?;
            publisher.publish(&topic, publication.encode()?).await?;
            println!("Published to {} (clock {})", topic, publication.clock);
        }
        Commands::Subscribe {
            relay,
            topic,
            count,
        } => {
            subscribe(relay, &topic, count, timeout).await?;
        }
        Commands::Health { nodes } => {
            check_health(&nodes).await?;
        }
    }

    Ok(())
}

fn random_identity() -> String {
    format!("bot_{}", rand::thread_rng().gen_range(1000..10000))
}

async fn subscribe(
    relay: SocketAddr,
    topic: &str,
    count: Option<usize>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock = LogicalClock::new();
    let mut subscriber = RelaySubscriber::connect(relay, timeout).await?;
    subscriber.subscribe(topic).await?;
    println!("Subscribed to {:?}", topic);

    let mut received = 0;
    while count.map_or(true, |limit| received < limit) {
        let frame = subscriber.next_message().await?;
        received += 1;
        match Publication::decode(&frame.payload) {
            Ok(publication) => {
                clock.observe(publication.clock);
                println!(
                    "[{}] {}: {} (clock {})",
                    frame.topic,
                    publication.user,
                    publication.message,
                    clock.current()
                );
            }
            Err(_) => println!("[{}] {} bytes", frame.topic, frame.payload.len()),
        }
    }
    Ok(())
}

async fn check_health(nodes: &str) -> Result<(), Box<dyn std::error::Error>> {
    let node_addrs = parse_nodes(nodes)?;
    let client = Client::new();

    for node in &node_addrs {
        let health_url = format!("http://{}/health", node);
        match client.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {
                let stats_url = format!("http://{}/stats", node);
                match client.get(&stats_url).send().await {
                    Ok(stats) => match stats.json::<serde_json::Value>().await {
                        Ok(stats) => println!(
                            "Node {}: OK, {} servers, next rank {}",
                            node, stats["service"]["servers"], stats["service"]["next_rank"]
                        ),
                        Err(_) => println!("Node {}: healthy but invalid stats format", node),
                    },
                    Err(e) => println!("Node {}: healthy, stats unavailable ({})", node, e),
                }
            }
            Ok(response) => {
                println!("Node {}: HTTP {}", node, response.status());
            }
            Err(e) => {
                println!("Node {}: unreachable ({})", node, e);
            }
        }
    }

    Ok(())
}

fn parse_nodes(nodes: &str) -> Result<Vec<SocketAddr>, Box<dyn std::error::Error>> {
    nodes
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .map_err(|e| format!("Invalid address '{}': {}", s, e).into())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodes() {
        let parsed = parse_nodes("127.0.0.1:8559, 127.0.0.1:8560,").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], "127.0.0.1:8560".parse().unwrap());
    }

    #[test]
    fn test_parse_nodes_rejects_garbage() {
        assert!(parse_nodes("localhost").is_err());
    }

    #[test]
    fn test_random_identity_shape() {
        let identity = random_identity();
        let digits = identity.strip_prefix("bot_").unwrap();
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
