use crate::scripts::shell_quote;
use crate::session::{CommandOutput, Session, SessionError};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Name filter matching every container the stack runs.
pub const STACK_FILTER: &str = "meshforge";

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub status: String,
    pub image: String,
    pub ports: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: String,
    pub created: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
}

/// A running stack container, as shown by the status check.
#[derive(Debug, Clone, Serialize)]
pub struct StackContainer {
    pub name: String,
    pub status: String,
    pub ports: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Remove,
    Logs,
}

impl ContainerAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "remove" => Some(Self::Remove),
            "logs" => Some(Self::Logs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "remove",
            Self::Logs => "logs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneKind {
    Images,
    Containers,
    Volumes,
    All,
}

impl PruneKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "images" => Some(Self::Images),
            "containers" => Some(Self::Containers),
            "volumes" => Some(Self::Volumes),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Containers => "containers",
            Self::Volumes => "volumes",
            Self::All => "all",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Images => "docker image prune -af",
            Self::Containers => "docker container prune -f",
            Self::Volumes => "docker volume prune -f",
            Self::All => "docker system prune -af --volumes",
        }
    }
}

/// Docker operations driven over an SSH session. The daemon on the target
/// is the only docker we ever talk to; there is no local socket.
pub struct Docker;

impl Docker {
    pub async fn list_containers(session: &Session) -> Result<Vec<ContainerInfo>> {
        const FMT: &str =
            r#"{"name":"{{.Names}}","status":"{{.Status}}","image":"{{.Image}}","ports":"{{.Ports}}"}"#;
        let out = session
            .run(&format!("docker ps -a --format '{}' 2>/dev/null || true", FMT))
            .await?;
        Ok(parse_json_lines(&out.stdout))
    }

    /// Stack containers only, pipe-delimited for the status check.
    pub async fn stack_containers(session: &Session) -> Result<Vec<StackContainer>> {
        let cmd = format!(
            "docker ps --format '{{{{.Names}}}}|{{{{.Status}}}}|{{{{.Ports}}}}' 2>/dev/null | grep {} || true",
            STACK_FILTER
        );
        let out = session.run(&cmd).await?;

        let mut containers = Vec::new();
        for line in out.stdout.lines() {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() >= 3 {
                containers.push(StackContainer {
                    name: parts[0].to_string(),
                    status: parts[1].to_string(),
                    ports: parts[2].to_string(),
                });
            }
        }
        Ok(containers)
    }

    pub async fn container_action(
        session: &Session,
        action: ContainerAction,
        container: &str,
    ) -> Result<CommandOutput, SessionError> {
        let name = shell_quote(container);
        let cmd = match action {
            ContainerAction::Logs => format!("docker logs --tail 100 {}", name),
            ContainerAction::Remove => format!("docker rm -f {}", name),
            other => format!("docker {} {}", other.name(), name),
        };
        session.run(&cmd).await
    }

    pub async fn list_images(session: &Session) -> Result<Vec<ImageInfo>> {
        // Keep the ID so dangling images without a repository stay addressable
        const FMT: &str = r#"{"id":"{{.ID}}","repository":"{{.Repository}}","tag":"{{.Tag}}","size":"{{.Size}}","created":"{{.CreatedSince}}"}"#;
        let out = session
            .run(&format!("docker images --format '{}' 2>/dev/null", FMT))
            .await?;
        Ok(parse_json_lines(&out.stdout))
    }

    pub async fn delete_image(
        session: &Session,
        image: &str,
    ) -> Result<CommandOutput, SessionError> {
        session
            .run(&format!("docker rmi -f {}", shell_quote(image)))
            .await
    }

    pub async fn list_volumes(session: &Session) -> Result<Vec<VolumeInfo>> {
        const FMT: &str = r#"{"name":"{{.Name}}","driver":"{{.Driver}}"}"#;
        let out = session
            .run(&format!("docker volume ls --format '{}' 2>/dev/null", FMT))
            .await?;
        Ok(parse_json_lines(&out.stdout))
    }

    pub async fn delete_volume(
        session: &Session,
        volume: &str,
    ) -> Result<CommandOutput, SessionError> {
        session
            .run(&format!("docker volume rm -f {}", shell_quote(volume)))
            .await
    }

    pub async fn prune(
        session: &Session,
        kind: PruneKind,
    ) -> Result<CommandOutput, SessionError> {
        session.run(kind.command()).await
    }

    /// Free disk on / and free memory, human-readable.
    pub async fn host_resources(session: &Session) -> Result<(String, String)> {
        let disk = session
            .run("df -h / | tail -1 | awk '{print $4}'")
            .await?;
        let mem = session.run("free -h | grep Mem | awk '{print $4}'").await?;
        Ok((
            disk.stdout.trim().to_string(),
            mem.stdout.trim().to_string(),
        ))
    }
}

pub(crate) fn parse_json_lines<T: for<'de> Deserialize<'de>>(stdout: &str) -> Vec<T> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
