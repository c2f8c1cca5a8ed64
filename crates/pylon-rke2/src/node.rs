//! Per-node operations shelled out over SSH. Every upload uses a
//! hex-encode/echo/`xxd -r -p`/tee pattern so file content never has to
//! survive shell quoting.

use std::time::Duration;

use pylon_models::ssh::SshConfig;
use pylon_sshcore::RunSshOptions;

use crate::Rke2Error;

fn hex_upload_cmd(content: &str, dest: &str) -> Vec<String> {
    let enc = hex::encode(content.as_bytes());
    vec![
        "bash".to_owned(),
        "-c".to_owned(),
        format!("echo '{enc}' | xxd -r -p | sudo tee {dest} >/dev/null"),
    ]
}

async fn ssh_sensitive(cfg: &SshConfig, argv: &[&str]) -> Result<String, Rke2Error> {
    let argv: Vec<String> = argv.iter().map(|s| (*s).to_owned()).collect();
    Ok(pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?)
}

async fn present(cfg: &SshConfig, binary: &str) -> bool {
    ssh_sensitive(cfg, &["which", binary]).await.is_ok()
}

pub async fn disable_swap(cfg: &SshConfig) -> Result<(), Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "swapoff", "-a"]).await?;
    let sed = r"sudo sed -i.bak '/\sswap\s/s/^/#/g' /etc/fstab";
    ssh_sensitive(cfg, &["bash", "-c", sed]).await?;
    Ok(())
}

pub async fn load_kernel_modules(cfg: &SshConfig) -> Result<(), Rke2Error> {
    for module in ["overlay", "br_netfilter"] {
        ssh_sensitive(cfg, &["sudo", "modprobe", module]).await?;
    }
    let argv = hex_upload_cmd("overlay\nbr_netfilter\n", "/etc/modules-load.d/rke2.conf");
    pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    Ok(())
}

pub async fn configure_sysctl(cfg: &SshConfig) -> Result<(), Rke2Error> {
    let content = "net.ipv4.ip_forward=1\nnet.bridge.bridge-nf-call-iptables=1\nnet.bridge.bridge-nf-call-ip6tables=1\n";
    let argv = hex_upload_cmd(content, "/etc/sysctl.d/99-rke2.conf");
    pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    ssh_sensitive(cfg, &["sudo", "sysctl", "--system"]).await?;
    Ok(())
}

const NVIDIA_DRIVER_SCRIPT: &str = "#!/usr/bin/env bash\nset -eux\nsudo apt-get update -y\nsudo apt-get install -y ubuntu-drivers-common\nsudo ubuntu-drivers autoinstall\n";
const NVIDIA_TOOLKIT_SCRIPT: &str = "#!/usr/bin/env bash\nset -eux\ndistribution=$(. /etc/os-release;echo $ID$VERSION_ID)\nwget https://nvidia.github.io/libnvidia-container/gpgkey -O /tmp/nvidia_gpg.pub\nsudo apt-key add /tmp/nvidia_gpg.pub\ncurl -s -L https://nvidia.github.io/libnvidia-container/$distribution/libnvidia-container.list | sed 's#deb https://#deb [arch=amd64] https://#g' | sudo tee /etc/apt/sources.list.d/nvidia-container-toolkit.list\nsudo apt-get update -y\nsudo apt-get install -y nvidia-container-toolkit\n";
const NVIDIA_CONTAINERD_PATCH: &str = "[plugins.\"io.containerd.grpc.v1.cri\".containerd.runtimes.nvidia]\n  runtime_type = \"io.containerd.runc.v2\"\n  [plugins.\"io.containerd.grpc.v1.cri\".containerd.runtimes.nvidia.options]\n    BinaryName = \"nvidia-container-runtime\"\n";

pub async fn install_gpu_drivers(cfg: &SshConfig) -> Result<(), Rke2Error> {
    if !present(cfg, "nvidia-smi").await {
        let argv = vec!["bash".to_owned(), "-c".to_owned(), format!("echo '{}' | xxd -r -p | sudo bash -s", hex::encode(NVIDIA_DRIVER_SCRIPT))];
        pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    }
    if !present(cfg, "nvidia-container-runtime").await {
        let argv = vec!["bash".to_owned(), "-c".to_owned(), format!("echo '{}' | xxd -r -p | sudo bash -s", hex::encode(NVIDIA_TOOLKIT_SCRIPT))];
        pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    }
    let argv = hex_upload_cmd(NVIDIA_CONTAINERD_PATCH, "/etc/containerd/config_nvidia.toml");
    pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    ssh_sensitive(cfg, &["sudo", "systemctl", "restart", "containerd"]).await?;
    Ok(())
}

pub async fn reboot_and_wait(cfg: &SshConfig) -> Result<(), Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "reboot"]).await?;
    wait_for_ssh(cfg).await
}

async fn wait_for_ssh(cfg: &SshConfig) -> Result<(), Rke2Error> {
    let mut opts = RunSshOptions::new();
    opts.retries = 1;
    opts.retry_delay = Duration::from_secs(1);

    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        if pylon_sshcore::run_ssh(cfg, &["true".to_owned()], &opts).await.is_ok() {
            return Ok(());
        }
    }
    Err(Rke2Error::SshTimedOut {
        hostname: cfg.hostname.clone(),
    })
}

fn server_join_config(server_ip: &str, node_token: &str) -> String {
    format!("server: https://{server_ip}:9345\ntoken: {node_token}\ntls-san:\n  - {server_ip}\n")
}

pub async fn install_server(cfg: &SshConfig, channel: &str, join: Option<(&str, &str)>) -> Result<(), Rke2Error> {
    if !present(cfg, "rke2").await {
        let script = format!(
            "#!/usr/bin/env bash\nset -eux\ncurl -sfL https://get.rke2.io | INSTALL_RKE2_CHANNEL={channel} INSTALL_RKE2_TYPE=server sudo sh -\nsudo systemctl enable rke2-server\nsudo systemctl start rke2-server\n"
        );
        let argv = vec!["bash".to_owned(), "-c".to_owned(), format!("echo '{}' | xxd -r -p | sudo bash -s", hex::encode(script))];
        pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    } else {
        ssh_sensitive(cfg, &["sudo", "systemctl", "enable", "rke2-server"]).await?;
        ssh_sensitive(cfg, &["sudo", "systemctl", "start", "rke2-server"]).await?;
    }

    if let Some((server_ip, node_token)) = join {
        let argv = hex_upload_cmd(&server_join_config(server_ip, node_token), "/etc/rancher/rke2/config.yaml");
        pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
        ssh_sensitive(cfg, &["sudo", "systemctl", "restart", "rke2-server"]).await?;
    }
    Ok(())
}

pub async fn install_agent(cfg: &SshConfig, channel: &str, server_ip: &str, node_token: &str) -> Result<(), Rke2Error> {
    if !present(cfg, "rke2").await {
        let script = format!(
            "#!/usr/bin/env bash\nset -eux\ncurl -sfL https://get.rke2.io | INSTALL_RKE2_CHANNEL={channel} INSTALL_RKE2_TYPE=agent sudo sh -\nsudo systemctl enable rke2-agent\nsudo systemctl start rke2-agent\n"
        );
        let argv = vec!["bash".to_owned(), "-c".to_owned(), format!("echo '{}' | xxd -r -p | sudo bash -s", hex::encode(script))];
        pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    } else {
        ssh_sensitive(cfg, &["sudo", "systemctl", "enable", "rke2-agent"]).await?;
        ssh_sensitive(cfg, &["sudo", "systemctl", "start", "rke2-agent"]).await?;
    }

    let argv = hex_upload_cmd(&server_join_config(server_ip, node_token), "/etc/rancher/rke2/config.yaml");
    pylon_sshcore::run_ssh(cfg, &argv, &RunSshOptions::new()).await?;
    ssh_sensitive(cfg, &["sudo", "systemctl", "restart", "rke2-agent"]).await?;
    Ok(())
}

pub async fn node_token(cfg: &SshConfig) -> Result<String, Rke2Error> {
    pylon_retry::retry("rke2-node-token", 30, Duration::from_secs(2), || async {
        let out = ssh_sensitive(cfg, &["sudo", "cat", "/var/lib/rancher/rke2/server/node-token"]).await?;
        let token = out.trim().to_owned();
        if token.is_empty() {
            return Err(Rke2Error::EmptyNodeToken);
        }
        Ok(token)
    })
    .await
}

pub async fn kubeconfig(cfg: &SshConfig) -> Result<String, Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "cat", "/etc/rancher/rke2/rke2.yaml"]).await
}

pub async fn uninstall(cfg: &SshConfig) -> Result<(), Rke2Error> {
    for script in ["rke2-uninstall.sh", "rke2-agent-uninstall.sh"] {
        let cmd = format!("sudo bash -c '[[ -f /usr/local/bin/{script} ]] && /usr/local/bin/{script}'");
        ssh_sensitive(cfg, &["bash", "-c", &cmd]).await?;
    }
    Ok(())
}

pub async fn upgrade(cfg: &SshConfig, channel: &str) -> Result<(), Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "systemctl", "stop", "rke2-server", "rke2-agent"]).await?;
    let cmd = format!("curl -sfL https://get.rke2.io | sudo INSTALL_RKE2_CHANNEL={channel} sh -");
    ssh_sensitive(cfg, &["bash", "-c", &cmd]).await?;
    for svc in ["rke2-server", "rke2-agent"] {
        ssh_sensitive(cfg, &["sudo", "systemctl", "start", svc]).await?;
    }
    Ok(())
}

pub async fn rotate_certs_on(cfg: &SshConfig) -> Result<(), Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "rke2", "certificate", "rotate", "--force"]).await?;
    ssh_sensitive(cfg, &["sudo", "systemctl", "restart", "rke2-server"]).await?;
    Ok(())
}

pub async fn etcd_snapshot(cfg: &SshConfig, name: &str) -> Result<(), Rke2Error> {
    ssh_sensitive(cfg, &["sudo", "rke2", "etcd-snapshot", "save", "--name", name]).await?;
    Ok(())
}

pub async fn reset(cfg: &SshConfig, is_control_plane: bool) -> Result<(), Rke2Error> {
    let svc = if is_control_plane { "rke2-server" } else { "rke2-agent" };
    ssh_sensitive(cfg, &["sudo", "systemctl", "stop", svc]).await?;
    uninstall(cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_upload_cmd_roundtrips_through_hex() {
        let argv = hex_upload_cmd("hello\n", "/tmp/x");
        let script = &argv[2];
        assert!(script.contains(&hex::encode("hello\n")));
        assert!(script.ends_with("/tmp/x >/dev/null"));
    }

    #[test]
    fn server_join_config_embeds_ip_and_token() {
        let cfg = server_join_config("10.0.0.1", "tok");
        assert!(cfg.contains("server: https://10.0.0.1:9345"));
        assert!(cfg.contains("token: tok"));
    }
}
