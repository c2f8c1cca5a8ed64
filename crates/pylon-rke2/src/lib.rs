//! Idempotent RKE2 cluster deployment and maintenance over SSH.
//!
//! Every install step here only changes state that isn't already in
//! place; the one non-idempotent gate is the prep reboot, which is
//! always followed by a bounded wait for SSH to come back.

mod node;

use futures::future::try_join_all;
use pylon_models::rke2::{Rke2Credentials, Rke2Inventory};
use pylon_models::ssh::SshConfig;
use pylon_secretclient::SecretClient;

/// Failure in cluster deployment or maintenance.
#[derive(Debug, thiserror::Error)]
pub enum Rke2Error {
    #[error("ssh operation failed: {0}")]
    Ssh(#[from] pylon_sshcore::SshError),
    #[error("secret services error: {0}")]
    SecretServices(#[from] pylon_secretservices::SecretServicesError),
    #[error("no instances found in control-plane group {group}")]
    EmptyControlPlaneGroup { group: String },
    #[error("timed out waiting for ssh on {hostname} to come back after reboot")]
    SshTimedOut { hostname: String },
    #[error("node-token file was empty")]
    EmptyNodeToken,
}

async fn ssh_config_for(secret_client: &SecretClient, vault_path: &str) -> Result<SshConfig, Rke2Error> {
    Ok(pylon_secretservices::ssh::get(secret_client, vault_path, true).await?)
}

async fn prepare_instance(secret_client: &SecretClient, vault_path: &str, has_gpu: bool) -> Result<(), Rke2Error> {
    let cfg = ssh_config_for(secret_client, vault_path).await?;
    node::disable_swap(&cfg).await?;
    node::load_kernel_modules(&cfg).await?;
    node::configure_sysctl(&cfg).await?;
    if has_gpu {
        node::install_gpu_drivers(&cfg).await?;
    }
    node::reboot_and_wait(&cfg).await
}

/// Deploys an RKE2 cluster across every group in `inventory`, with the
/// first instance of `control_plane_group` as the HA bootstrap node.
/// Persists the resulting [`Rke2Credentials`] at `credentials_path`
/// rather than returning them.
///
/// # Errors
///
/// Returns [`Rke2Error::EmptyControlPlaneGroup`] if `control_plane_group`
/// names no instances, or propagates any prep/install/SSH failure.
pub async fn deploy_cluster(
    inventory: &Rke2Inventory,
    control_plane_group: &str,
    secret_client: &SecretClient,
    credentials_path: &str,
    channel: &str,
) -> Result<(), Rke2Error> {
    let all_preps = inventory
        .instances
        .values()
        .flatten()
        .map(|inst| prepare_instance(secret_client, &inst.vault_path, inst.has_gpu));
    try_join_all(all_preps).await?;

    let cp_list = inventory
        .instances
        .get(control_plane_group)
        .filter(|insts| !insts.is_empty())
        .ok_or_else(|| Rke2Error::EmptyControlPlaneGroup {
            group: control_plane_group.to_owned(),
        })?;

    let bootstrap = &cp_list[0];
    let bootstrap_ssh = ssh_config_for(secret_client, &bootstrap.vault_path).await?;
    node::install_server(&bootstrap_ssh, channel, None).await?;
    let token = node::node_token(&bootstrap_ssh).await?;

    if cp_list.len() > 1 {
        let joins = cp_list[1..].iter().map(|inst| {
            let token = token.clone();
            let bootstrap_ip = bootstrap.private_ip.clone();
            async move {
                let cfg = ssh_config_for(secret_client, &inst.vault_path).await?;
                node::install_server(&cfg, channel, Some((&bootstrap_ip, &token))).await
            }
        });
        try_join_all(joins).await?;
    }

    let agents = inventory.agents_outside(control_plane_group);
    let agent_joins = agents.iter().map(|inst| {
        let token = token.clone();
        let bootstrap_ip = bootstrap.private_ip.clone();
        async move {
            let cfg = ssh_config_for(secret_client, &inst.vault_path).await?;
            node::install_agent(&cfg, channel, &bootstrap_ip, &token).await
        }
    });
    try_join_all(agent_joins).await?;

    let kubeconfig = node::kubeconfig(&bootstrap_ssh).await?;
    let creds = Rke2Credentials {
        kubeconfig,
        join_token: token,
        control_plane_ssh_vault_path: cp_list.iter().map(|inst| inst.vault_path.clone()).collect(),
    };
    pylon_secretservices::rke2creds::save(secret_client, credentials_path, &creds).await?;
    Ok(())
}

/// Uninstalls RKE2 from every node in `ssh_cfgs` in parallel, then runs
/// `remove_infra_callback` if provided.
///
/// # Errors
///
/// Propagates any node's uninstall failure.
pub async fn destroy_cluster<F: FnOnce()>(ssh_cfgs: &[SshConfig], remove_infra_callback: Option<F>) -> Result<(), Rke2Error> {
    try_join_all(ssh_cfgs.iter().map(node::uninstall)).await?;
    if let Some(callback) = remove_infra_callback {
        callback();
    }
    Ok(())
}

/// Upgrades `server_cfgs` sequentially, then `agent_cfgs` in parallel, to
/// `channel`.
///
/// # Errors
///
/// Propagates any node's upgrade failure.
pub async fn upgrade_cluster(server_cfgs: &[SshConfig], agent_cfgs: &[SshConfig], channel: &str) -> Result<(), Rke2Error> {
    for cfg in server_cfgs {
        node::upgrade(cfg, channel).await?;
    }
    try_join_all(agent_cfgs.iter().map(|cfg| node::upgrade(cfg, channel))).await?;
    Ok(())
}

/// Rotates certificates and restarts the server service on each of
/// `server_cfgs`, sequentially.
///
/// # Errors
///
/// Propagates any node's rotation failure.
pub async fn rotate_certs(server_cfgs: &[SshConfig]) -> Result<(), Rke2Error> {
    for cfg in server_cfgs {
        node::rotate_certs_on(cfg).await?;
    }
    Ok(())
}

/// Triggers an etcd snapshot named `snapshot_name` on the control-plane
/// node at `cfg`.
///
/// # Errors
///
/// Propagates the SSH failure.
pub async fn backup(cfg: &SshConfig, snapshot_name: &str) -> Result<(), Rke2Error> {
    node::etcd_snapshot(cfg, snapshot_name).await
}

/// Stops the role-specific service on `cfg` and uninstalls RKE2.
///
/// # Errors
///
/// Propagates the SSH failure.
pub async fn reset_node(cfg: &SshConfig, is_control_plane: bool) -> Result<(), Rke2Error> {
    node::reset(cfg, is_control_plane).await
}
