use crate::archive::build_archive;
use crate::docker::{Docker, StackContainer};
use crate::events::DeployEvent;
use crate::registry::{TargetRegistry, TargetStatus};
use crate::scripts::{
    shell_quote, Action, ScriptBuilder, ScriptConfig, ARCHIVE_REMOTE_PATH, INSTALL_DIR,
    SECRETS_BEGIN, SECRETS_END,
};
use crate::session::{CommandOutput, Session};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub reinstall: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub migrate_only: bool,
    #[serde(default)]
    pub config: Option<ScriptConfig>,
}

impl DeployRequest {
    pub fn action(&self) -> Action {
        if self.migrate_only {
            Action::Migrate
        } else if self.update {
            Action::Update
        } else if self.reinstall {
            Action::Reinstall
        } else {
            Action::Install
        }
    }

    fn source(&self) -> &str {
        self.source.as_deref().unwrap_or("local")
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinVpnRequest {
    pub network_id: String,
    pub control_plane_url: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub id: String,
    pub name: String,
    pub host: String,
    pub status: TargetStatus,
    pub is_installed: bool,
    pub containers: Vec<StackContainer>,
    pub free_space: String,
    pub free_memory: String,
    pub last_check: String,
}

/// Target status after an action finishes. `None` leaves it alone.
/// Uninstall forgets the install no matter what the script reported.
pub fn status_after(action: Action, success: bool) -> Option<TargetStatus> {
    match action {
        Action::Install | Action::Reinstall | Action::Update => Some(if success {
            TargetStatus::Installed
        } else {
            TargetStatus::Error
        }),
        Action::Uninstall => Some(TargetStatus::NotInstalled),
        Action::Migrate => None,
    }
}

/// Extract the machine-readable secrets block a script prints once.
///
/// Strict line grammar: a BEGIN marker line, `KEY=VALUE` lines with keys in
/// `[A-Z0-9_]`, an END marker line. Returns Ok(None) when no block exists;
/// a malformed or unterminated block is an error the caller may swallow.
pub fn parse_secrets_block(output: &str) -> Result<Option<HashMap<String, String>>> {
    let mut lines = output.lines().map(|l| l.trim_end_matches('\r'));
    if !lines.any(|l| l == SECRETS_BEGIN) {
        return Ok(None);
    }

    let mut secrets = HashMap::new();
    for line in lines {
        if line == SECRETS_END {
            return Ok(Some(secrets));
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("Malformed secrets line: {:?}", line))?;
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            bail!("Malformed secrets key: {:?}", key);
        }
        secrets.insert(key.to_string(), value.to_string());
    }
    bail!("Unterminated secrets block")
}

/// The orchestrating state machine: one invocation per request, per-target
/// serialization via the registry's deploy locks.
pub struct Deployer {
    registry: Arc<TargetRegistry>,
    scripts: ScriptBuilder,
    source_dir: PathBuf,
}

impl Deployer {
    pub fn new(registry: Arc<TargetRegistry>, scripts: ScriptBuilder, source_dir: PathBuf) -> Self {
        Self {
            registry,
            scripts,
            source_dir,
        }
    }

    /// Run a deployment, pushing progress into `tx`.
    ///
    /// Every exit path emits exactly one terminal event. A dropped receiver
    /// (the caller disconnected) never aborts the run: the remote script
    /// keeps going and the registry still gets its status and history.
    pub async fn run(&self, target_id: &str, req: DeployRequest, tx: mpsc::Sender<DeployEvent>) {
        let action = req.action();
        let result = self.run_inner(target_id, &req, action, &tx).await;

        let terminal = match result {
            Ok(success) => DeployEvent::Done { success },
            Err(err) => DeployEvent::Error {
                message: format!("{:#}", err),
            },
        };
        let _ = tx.send(terminal).await;
    }

    async fn run_inner(
        &self,
        target_id: &str,
        req: &DeployRequest,
        action: Action,
        tx: &mpsc::Sender<DeployEvent>,
    ) -> Result<bool> {
        let target = self
            .registry
            .get(target_id)
            .await
            .ok_or_else(|| anyhow!("Target '{}' not found", target_id))?;

        // Same-target deployments serialize; other targets are unaffected.
        let lock = self.registry.deploy_lock(target_id);
        let _guard = lock.lock().await;

        println!(
            "🚀 {} starting for '{}' ({})",
            action.name(),
            target.name,
            target.host
        );

        let archive = if action.needs_archive() && req.source() == "local" {
            Some(
                build_archive(&self.source_dir)
                    .await
                    .context("Failed to create archive")?,
            )
        } else {
            None
        };

        let session = Session::connect(&target).await?;

        if let Some(archive) = &archive {
            let _ = tx
                .send(DeployEvent::info("Uploading source archive...\n"))
                .await;
            session.upload(archive.path(), ARCHIVE_REMOTE_PATH).await?;
        }
        // The local tar.gz is gone from here on, success or not
        drop(archive);

        let config = req.config.clone().unwrap_or_default();
        let script = self.scripts.build(action, &config);

        let mut stream = session.run_streaming(&script, false).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next_chunk().await {
            output.push_str(&chunk.text);
            output.push('\n');
            // Receiver may be gone; the deployment does not care
            let _ = tx.send(DeployEvent::from_chunk(chunk)).await;
        }
        let exit_code = stream.wait().await?;
        let success = exit_code == 0;

        let new_status = status_after(action, success);
        let source = req.source().to_string();
        self.registry
            .update(target_id, |t| {
                if let Some(status) = new_status {
                    t.status = status;
                }
                if success && matches!(action, Action::Install | Action::Reinstall) {
                    t.installed_at = Some(Utc::now().to_rfc3339());
                }
                t.record(action.name(), success, Some(json!({ "source": source })));
            })
            .await?;

        if success && matches!(action, Action::Install | Action::Reinstall | Action::Update) {
            self.capture_secrets(&output, &target.host, tx).await;
        }

        println!(
            "{} {} finished for '{}' (exit {})",
            if success { "✅" } else { "❌" },
            action.name(),
            target.name,
            exit_code
        );
        Ok(success)
    }

    /// Point the local dashboard at the fresh deployment. Best-effort by
    /// design: the deployment itself already succeeded, so parse or write
    /// failures downgrade to a warning event.
    async fn capture_secrets(&self, output: &str, host: &str, tx: &mpsc::Sender<DeployEvent>) {
        match parse_secrets_block(output) {
            Ok(Some(secrets)) => {
                if let Some(api_key) = secrets.get("API_KEY") {
                    match self.write_dashboard_env(host, api_key) {
                        Ok(path) => {
                            let _ = tx
                                .send(DeployEvent::info(format!(
                                    "\n[INFO] Dashboard env updated: {}\n",
                                    path.display()
                                )))
                                .await;
                        }
                        Err(err) => {
                            eprintln!("⚠️  Failed to write dashboard env: {:#}", err);
                            let _ = tx
                                .send(DeployEvent::info(format!(
                                    "\n[WARN] Failed to update dashboard env: {:#}\n",
                                    err
                                )))
                                .await;
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                eprintln!("⚠️  Secrets block rejected: {:#}", err);
                let _ = tx
                    .send(DeployEvent::info(format!(
                        "\n[WARN] Could not parse secrets from output: {:#}\n",
                        err
                    )))
                    .await;
            }
        }
    }

    fn write_dashboard_env(&self, host: &str, api_key: &str) -> Result<PathBuf> {
        // Containerized dashboards mount /web; otherwise write next to the source
        let path = if std::path::Path::new("/web").is_dir() {
            PathBuf::from("/web/.env")
        } else {
            self.source_dir.join("web").join(".env")
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = format!("API_URL=http://{}:8080\nAPI_KEY={}\n", host, api_key);
        std::fs::write(&path, content).with_context(|| format!("writing {:?}", path))?;
        Ok(path)
    }

    /// Uninstall is a one-shot: no streaming, status forced to not_installed
    /// even when the script reports failure.
    pub async fn uninstall(&self, target_id: &str) -> Result<CommandOutput> {
        let target = self
            .registry
            .get(target_id)
            .await
            .ok_or_else(|| anyhow!("Target '{}' not found", target_id))?;

        let lock = self.registry.deploy_lock(target_id);
        let _guard = lock.lock().await;

        let session = Session::connect(&target).await?;
        let script = self.scripts.build(Action::Uninstall, &ScriptConfig::default());
        let output = session.run(&script).await?;
        let success = output.success();

        self.registry
            .update(target_id, |t| {
                t.status = status_after(Action::Uninstall, success)
                    .expect("uninstall always sets a status");
                t.record(Action::Uninstall.name(), success, None);
            })
            .await?;

        Ok(output)
    }

    /// Connect, probe the install marker, list stack containers, read free
    /// resources. Flips status to offline when the connection fails.
    pub async fn status_check(&self, target_id: &str) -> Result<StatusReport> {
        let target = self
            .registry
            .get(target_id)
            .await
            .ok_or_else(|| anyhow!("Target '{}' not found", target_id))?;

        let session = match Session::connect(&target).await {
            Ok(session) => session,
            Err(err) => {
                self.registry
                    .update(target_id, |t| {
                        t.status = TargetStatus::Offline;
                        t.last_check = Some(Utc::now().to_rfc3339());
                    })
                    .await?;
                return Err(anyhow!("Unable to connect to target: {}", err));
            }
        };

        let marker = session
            .run(&format!(
                "test -d {} && echo installed || echo not_installed",
                INSTALL_DIR
            ))
            .await?;
        let is_installed = marker.stdout.trim() == "installed";

        let containers = Docker::stack_containers(&session).await?;
        let (free_space, free_memory) = Docker::host_resources(&session).await?;

        let status = if is_installed {
            TargetStatus::Installed
        } else {
            TargetStatus::NotInstalled
        };
        let last_check = Utc::now().to_rfc3339();
        self.registry
            .update(target_id, |t| {
                t.status = status;
                t.last_check = Some(last_check.clone());
            })
            .await?;

        Ok(StatusReport {
            id: target.id,
            name: target.name,
            host: target.host,
            status,
            is_installed,
            containers,
            free_space,
            free_memory,
            last_check,
        })
    }

    /// Join the target into an existing mesh. A direct command sequence, not
    /// a rendered script: intermediate results (keypair, received config)
    /// feed the next step. The control-plane call runs on the *target* via
    /// curl so the orchestrator needs no route to the mesh itself.
    pub async fn join_vpn(&self, target_id: &str, req: &JoinVpnRequest) -> Result<()> {
        let target = self
            .registry
            .get(target_id)
            .await
            .ok_or_else(|| anyhow!("Target '{}' not found", target_id))?;

        let session = Session::connect(&target).await?;
        let result = self.join_vpn_steps(&session, &target.name, req).await;

        self.registry
            .update(target_id, |t| {
                t.record("join_vpn", result.is_ok(), None);
            })
            .await?;
        result
    }

    async fn join_vpn_steps(
        &self,
        session: &Session,
        target_name: &str,
        req: &JoinVpnRequest,
    ) -> Result<()> {
        let apt_prefix = if self.scripts.apt_noninteractive {
            "export DEBIAN_FRONTEND=noninteractive; "
        } else {
            ""
        };
        let install = session
            .run(&format!(
                "{}apt-get update -qq && apt-get install -y wireguard wireguard-tools curl",
                apt_prefix
            ))
            .await?;
        if !install.success() {
            bail!("WireGuard install failed: {}", install.stderr.trim());
        }

        let genkey = session.run("wg genkey").await?;
        if !genkey.success() {
            bail!("Key generation failed: {}", genkey.stderr.trim());
        }
        let private_key = genkey.stdout.trim().to_string();

        let pubkey = session
            .run(&format!("echo {} | wg pubkey", shell_quote(&private_key)))
            .await?;
        if !pubkey.success() {
            bail!("Public key derivation failed: {}", pubkey.stderr.trim());
        }
        let public_key = pubkey.stdout.trim().to_string();

        let register_url = format!(
            "{}/api/v1/networks/{}/servers",
            req.control_plane_url.trim_end_matches('/'),
            req.network_id
        );
        let payload = json!({
            "name": target_name,
            "publicKey": public_key,
            "labels": { "installer": "true" },
        })
        .to_string();
        let register = session
            .run(&format!(
                "curl -sf -X POST {url} -H {auth} -H 'Content-Type: application/json' -d {body}",
                url = shell_quote(&register_url),
                auth = shell_quote(&format!("X-API-Key: {}", req.api_key)),
                body = shell_quote(&payload),
            ))
            .await?;
        if !register.success() {
            bail!("Registration failed: {}", register.combined().trim());
        }

        let response: serde_json::Value = serde_json::from_str(register.stdout.trim())
            .context("Control plane returned invalid JSON")?;
        let wg_config = response["config"]
            .as_str()
            .ok_or_else(|| anyhow!("No config received from control plane"))?;

        let write = session
            .run(&format!(
                "mkdir -p /etc/wireguard && printf '%s\\n' {} > /etc/wireguard/wg0.conf && chmod 600 /etc/wireguard/wg0.conf",
                shell_quote(wg_config)
            ))
            .await?;
        if !write.success() {
            bail!("Failed to write wg0.conf: {}", write.stderr.trim());
        }

        session.run("sysctl -w net.ipv4.ip_forward=1").await?;
        session
            .run("echo 'net.ipv4.ip_forward=1' > /etc/sysctl.d/99-wireguard.conf")
            .await?;

        let up = session.run("systemctl enable --now wg-quick@wg0").await?;
        if !up.success() {
            bail!("Failed to bring up wg0: {}", up.stderr.trim());
        }
        Ok(())
    }
}
