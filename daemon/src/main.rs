//! Beacon daemon: entry point for running a beacon node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use beacon_network::{
    FilePolicySource, PolicySource, SecurityManager, StaticPolicySource, SECRET_KEY_ENV,
};
use beacon_node::{BeaconNode, NodeConfig};
use beacon_types::{PeerAddress, SystemClock};
use beacon_utils::{format_duration, init_logging, LogFormat};
use clap::Parser;

#[derive(Parser)]
#[command(name = "beacon-daemon", about = "P2P spammer-database node daemon")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base; CLI
    /// flags and env vars override them. Its `[security]` table is
    /// required (it may be empty) and is re-read whenever the file changes.
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the spammer database.
    #[arg(long, env = "BEACON_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Interface to listen on.
    #[arg(long, env = "BEACON_LISTEN_HOST")]
    listen_host: Option<String>,

    /// Port for P2P connections.
    #[arg(long, env = "BEACON_P2P_PORT")]
    port: Option<u16>,

    /// This node's UUID. Generated when neither this nor the file sets one.
    #[arg(long, env = "BEACON_NODE_UUID")]
    node_uuid: Option<String>,

    /// Bootstrap peer addresses (comma-separated: "1.2.3.4:9828,5.6.7.8:9828").
    #[arg(long, env = "BEACON_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<PeerAddress>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "BEACON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "BEACON_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Inspect the security configuration.
    #[command(name = "security")]
    Security {
        #[command(subcommand)]
        action: SecurityAction,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
}

#[derive(clap::Subcommand)]
enum SecurityAction {
    /// Print the effective policy summary and security statistics.
    Status,
    /// Print the config file revision and the configured trusted nodes.
    Check,
}

impl Cli {
    /// The file configuration with CLI and environment overrides applied.
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(host) = &self.listen_host {
            config.listen_host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(uuid) = &self.node_uuid {
            config.node_uuid = Some(uuid.clone());
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if config.security.secret_key.is_empty() {
            if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
                config.security.secret_key = secret;
            }
        }
        Ok(config)
    }

    fn policy_source(&self, config: &NodeConfig) -> Box<dyn PolicySource> {
        match &self.config {
            Some(path) => Box::new(FilePolicySource::new(path.clone())),
            None => Box::new(StaticPolicySource::new(config.security.clone())),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;
    init_logging(config.log_format, &config.log_level);

    match &cli.command {
        Command::Node {
            action: NodeAction::Run,
        } => {
            tracing::info!(
                listen = %format!("{}:{}", config.listen_host, config.port),
                data_dir = %config.data_dir.display(),
                bootstrap_peers = config.bootstrap_peers.len(),
                "starting beacon node"
            );
            let source = cli.policy_source(&config);
            let mut node = BeaconNode::with_policy_source(config, source)?;
            node.run_until_signal().await?;
            tracing::info!("beacon daemon exited cleanly");
        }
        Command::Security {
            action: SecurityAction::Status,
        } => {
            let source = cli.policy_source(&config);
            let manager = SecurityManager::new(source, Arc::new(SystemClock))?;
            let status = serde_json::json!({
                "source": manager.source_description(),
                "policy": format!("{:?}", manager.policy()),
                "stats": manager.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Security {
            action: SecurityAction::Check,
        } => {
            security_check(&cli, &config)?;
        }
    }

    Ok(())
}

fn security_check(cli: &Cli, config: &NodeConfig) -> anyhow::Result<()> {
    match &cli.config {
        Some(path) => {
            let source = FilePolicySource::new(path.clone());
            println!("config file: {}", path.display());
            match source.revision() {
                Some(revision) => {
                    let age = SystemTime::now()
                        .duration_since(revision.modified)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    println!("last modified: {} ago", format_duration(age));
                    println!("size: {} bytes", revision.len);
                }
                None => println!("last modified: unknown"),
            }
        }
        None => println!("config file: none (built-in defaults)"),
    }

    let policy = cli.policy_source(config).load()?;
    println!("security enabled: {}", policy.enabled);
    println!("authentication required: {}", policy.require_authentication);
    println!("secret key configured: {}", policy.has_secret());
    println!("message signing: {}", policy.enable_message_signing);
    if policy.allowed_node_keys.is_empty() {
        println!("trusted nodes: any (whitelist disabled)");
    } else {
        println!("trusted nodes ({}):", policy.allowed_node_keys.len());
        for uuid in &policy.allowed_node_keys {
            println!("  {uuid}");
        }
    }
    println!("blocked nodes: {}", policy.blocked_node_keys.len());
    println!("blocked IPs: {}", policy.blocked_ips.len());
    Ok(())
}
