//! Command-line entry point: cluster provisioning, RKE2 deployment, and
//! SSH-config management, all driven by `VAULT_*` environment variables.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pylon_models::config::SecretClientConfig;
use pylon_models::rke2::Rke2Inventory;
use pylon_models::ssh::SshConfig;
use pylon_secretclient::SecretClient;
use pylon_statestore::NoStorage;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Cluster provisioning, RKE2 deployment, and SSH-config management.
#[derive(Parser)]
#[command(name = "pylon", version, about = "Multi-cloud control-plane CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// SSH-config lifecycle operations.
    Ssh {
        #[command(subcommand)]
        action: SshCommands,
    },
    /// RKE2 cluster deployment and maintenance.
    Rke2 {
        #[command(subcommand)]
        action: Rke2Commands,
    },
    /// Cloud-provider infrastructure deployment.
    Orchestrate {
        #[command(subcommand)]
        action: OrchestrateCommands,
    },
}

#[derive(Subcommand)]
enum SshCommands {
    /// Store an SSH config, running TOFU immediately if no host keys are given.
    Store {
        #[arg(long)]
        path: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        hostname: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// Path to the private key file.
        #[arg(long)]
        key_file: PathBuf,
        #[arg(long = "host-key", value_delimiter = ',')]
        host_keys: Vec<String>,
    },
    /// Retrieve a stored SSH config.
    Get {
        #[arg(long)]
        path: String,
        #[arg(long)]
        tofu: bool,
    },
    /// Delete a stored SSH config.
    Delete {
        #[arg(long)]
        path: String,
        #[arg(long)]
        hard: bool,
    },
}

#[derive(Subcommand)]
enum Rke2Commands {
    /// Deploy a cluster across every group named in the inventory file.
    Deploy {
        /// JSON file containing an [`Rke2Inventory`].
        #[arg(long)]
        inventory_file: PathBuf,
        #[arg(long)]
        cp_group: String,
        #[arg(long)]
        creds_path: String,
        #[arg(long, default_value = "stable")]
        channel: String,
    },
    /// Uninstall RKE2 from every listed SSH-config path.
    DestroyCluster {
        #[arg(long = "node", value_delimiter = ',')]
        node_paths: Vec<String>,
    },
    /// Upgrade servers sequentially, then agents in parallel.
    UpgradeCluster {
        #[arg(long = "server", value_delimiter = ',')]
        server_paths: Vec<String>,
        #[arg(long = "agent", value_delimiter = ',')]
        agent_paths: Vec<String>,
        #[arg(long, default_value = "stable")]
        channel: String,
    },
    /// Rotate certificates on every listed server, sequentially.
    RotateCerts {
        #[arg(long = "server", value_delimiter = ',')]
        server_paths: Vec<String>,
    },
    /// Trigger an on-demand etcd snapshot.
    Backup {
        #[arg(long)]
        server_path: String,
        #[arg(long, default_value = "on-demand")]
        name: String,
    },
    /// Stop the role-specific service and uninstall RKE2 on one node.
    ResetNode {
        #[arg(long)]
        path: String,
        #[arg(long)]
        control_plane: bool,
    },
}

#[derive(Subcommand)]
enum OrchestrateCommands {
    /// Resolve a provider credential and run init + apply.
    Deploy {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        creds_path: String,
        #[arg(long, default_value = ".")]
        base_path: PathBuf,
        #[arg(long, default_value = "terraform")]
        tool_binary: String,
        #[arg(long, default_value = "default")]
        workspace: String,
        /// `key=value` Terraform variables, may be repeated.
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    /// Resolve a provider credential and run destroy.
    Destroy {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        creds_path: String,
        #[arg(long, default_value = ".")]
        base_path: PathBuf,
        #[arg(long, default_value = "terraform")]
        tool_binary: String,
        #[arg(long, default_value = "default")]
        workspace: String,
    },
}

fn parse_vars(raw: &[String]) -> Result<HashMap<String, Value>> {
    raw.iter()
        .map(|entry| {
            let (key, value) = entry
                .split_once('=')
                .with_context(|| format!("expected key=value, got {entry:?}"))?;
            Ok((key.to_owned(), Value::String(value.to_owned())))
        })
        .collect()
}

async fn secret_client() -> Result<SecretClient> {
    let config = SecretClientConfig::from_env().context("loading VAULT_* configuration")?;
    SecretClient::new(config).context("constructing secret client")
}

async fn ssh_config_at(client: &SecretClient, path: &str) -> Result<SshConfig> {
    Ok(pylon_secretservices::ssh::get(client, path, false).await?)
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Ssh { action } => run_ssh(action).await,
        Commands::Rke2 { action } => run_rke2(action).await,
        Commands::Orchestrate { action } => run_orchestrate(action).await,
    }
}

async fn run_ssh(action: SshCommands) -> Result<()> {
    let client = secret_client().await?;
    match action {
        SshCommands::Store {
            path,
            user,
            hostname,
            port,
            key_file,
            host_keys,
        } => {
            let private_key = tokio::fs::read_to_string(&key_file)
                .await
                .with_context(|| format!("reading {}", key_file.display()))?;
            let cfg = SshConfig::new(user, hostname, port, private_key, host_keys)?;
            pylon_secretservices::ssh::store_with_tofu(&client, &path, &cfg).await?;
            tracing::info!(path, "stored ssh config");
            Ok(())
        }
        SshCommands::Get { path, tofu } => {
            let cfg = pylon_secretservices::ssh::get(&client, &path, tofu).await?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
        SshCommands::Delete { path, hard } => {
            pylon_secretservices::ssh::delete(&client, &path, hard).await?;
            tracing::info!(path, "deleted ssh config");
            Ok(())
        }
    }
}

async fn run_rke2(action: Rke2Commands) -> Result<()> {
    let client = secret_client().await?;
    match action {
        Rke2Commands::Deploy {
            inventory_file,
            cp_group,
            creds_path,
            channel,
        } => {
            let raw = tokio::fs::read(&inventory_file)
                .await
                .with_context(|| format!("reading {}", inventory_file.display()))?;
            let inventory: Rke2Inventory = serde_json::from_slice(&raw).context("parsing inventory file")?;
            pylon_rke2::deploy_cluster(&inventory, &cp_group, &client, &creds_path, &channel).await?;
            tracing::info!(cp_group, creds_path, "deployed rke2 cluster");
            Ok(())
        }
        Rke2Commands::DestroyCluster { node_paths } => {
            let mut cfgs = Vec::with_capacity(node_paths.len());
            for path in &node_paths {
                cfgs.push(ssh_config_at(&client, path).await?);
            }
            pylon_rke2::destroy_cluster(&cfgs, None::<fn()>).await?;
            tracing::info!(nodes = node_paths.len(), "destroyed rke2 cluster");
            Ok(())
        }
        Rke2Commands::UpgradeCluster {
            server_paths,
            agent_paths,
            channel,
        } => {
            let mut servers = Vec::with_capacity(server_paths.len());
            for path in &server_paths {
                servers.push(ssh_config_at(&client, path).await?);
            }
            let mut agents = Vec::with_capacity(agent_paths.len());
            for path in &agent_paths {
                agents.push(ssh_config_at(&client, path).await?);
            }
            pylon_rke2::upgrade_cluster(&servers, &agents, &channel).await?;
            tracing::info!(channel, "upgraded rke2 cluster");
            Ok(())
        }
        Rke2Commands::RotateCerts { server_paths } => {
            let mut servers = Vec::with_capacity(server_paths.len());
            for path in &server_paths {
                servers.push(ssh_config_at(&client, path).await?);
            }
            pylon_rke2::rotate_certs(&servers).await?;
            tracing::info!("rotated rke2 certificates");
            Ok(())
        }
        Rke2Commands::Backup { server_path, name } => {
            let cfg = ssh_config_at(&client, &server_path).await?;
            pylon_rke2::backup(&cfg, &name).await?;
            tracing::info!(name, "triggered rke2 etcd snapshot");
            Ok(())
        }
        Rke2Commands::ResetNode { path, control_plane } => {
            let cfg = ssh_config_at(&client, &path).await?;
            pylon_rke2::reset_node(&cfg, control_plane).await?;
            tracing::info!(path, "reset rke2 node");
            Ok(())
        }
    }
}

async fn run_orchestrate(action: OrchestrateCommands) -> Result<()> {
    let client = secret_client().await?;
    let storage = NoStorage;
    match action {
        OrchestrateCommands::Deploy {
            provider,
            creds_path,
            base_path,
            tool_binary,
            workspace,
            vars,
        } => {
            let vars = parse_vars(&vars)?;
            let iac_config = pylon_iacdriver::IacDriverConfig { tool_binary, base_path };
            pylon_orchestration::deploy(&provider, &client, &creds_path, &vars, false, iac_config, &storage, None, &workspace).await?;
            tracing::info!(provider, workspace, "applied provider infrastructure");
            Ok(())
        }
        OrchestrateCommands::Destroy {
            provider,
            creds_path,
            base_path,
            tool_binary,
            workspace,
        } => {
            let iac_config = pylon_iacdriver::IacDriverConfig { tool_binary, base_path };
            pylon_orchestration::deploy(&provider, &client, &creds_path, &HashMap::new(), true, iac_config, &storage, None, &workspace).await?;
            tracing::info!(provider, workspace, "destroyed provider infrastructure");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}
