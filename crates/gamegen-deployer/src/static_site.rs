//! Static site deployer.
//!
//! Each game lives in `<deploy_dir>/gamedemo<id>/html` and, when a Docker
//! client is configured, is served by its own nginx container.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{ConnectNetworkOptions, ListNetworksOptions};
use futures::StreamExt;
use gamegen_core::deployer::{DeployedGame, Deployer, Deployment, Removal};
use gamegen_core::workspace::copy_dir_all;
use gamegen_core::{Error, JobId, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::compose::{SERVER_IMAGE, TRAEFIK_NETWORK, compose_file, traefik_labels};

static GAME_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^gamedemo(\d+)$").expect("game dir pattern is valid"));

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});

/// Static site deployer settings.
#[derive(Debug, Clone)]
pub struct StaticSiteConfig {
    /// Deploy directory as seen by this process.
    pub deploy_dir: PathBuf,
    /// Deploy directory as seen by the Docker daemon.
    pub host_deploy_dir: PathBuf,
    /// Where the gallery listing is written.
    pub gallery_path: PathBuf,
    pub domain: String,
    pub base_port: u32,
}

impl Default for StaticSiteConfig {
    fn default() -> Self {
        Self {
            deploy_dir: PathBuf::from("/root/apps"),
            host_deploy_dir: PathBuf::from("/root/apps"),
            gallery_path: PathBuf::from("/root/apps/gallery/games.json"),
            domain: "localhost".to_string(),
            base_port: 8080,
        }
    }
}

/// Deployer publishing builds as static sites.
pub struct StaticSiteDeployer {
    config: StaticSiteConfig,
    docker: Option<Docker>,
}

impl StaticSiteDeployer {
    /// Deployer that only manages files; no containers are started.
    pub fn new(config: StaticSiteConfig) -> Self {
        Self {
            config,
            docker: None,
        }
    }

    /// Deployer that also runs an nginx container per game.
    pub fn with_docker(config: StaticSiteConfig, docker: Docker) -> Self {
        Self {
            config,
            docker: Some(docker),
        }
    }

    pub fn config(&self) -> &StaticSiteConfig {
        &self.config
    }

    fn site_name(job_id: JobId) -> String {
        format!("gamedemo{job_id}")
    }

    fn url(&self, name: &str) -> String {
        format!("https://{}.{}", name, self.config.domain)
    }

    fn port(&self, game_id: i64) -> u32 {
        self.config
            .base_port
            .saturating_add(u32::try_from(game_id).unwrap_or(0))
    }

    async fn stop_and_remove(docker: &Docker, name: &str) {
        if let Err(e) = docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            debug!(container = %name, error = %e, "Stop skipped");
        }
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = docker.remove_container(name, Some(options)).await {
            debug!(container = %name, error = %e, "Remove skipped");
        }
    }

    async fn pull_server_image(docker: &Docker) {
        let options = CreateImageOptions {
            from_image: SERVER_IMAGE,
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                warn!(image = SERVER_IMAGE, error = %e, "Pull warning");
                break;
            }
        }
    }

    async fn traefik_network_id(docker: &Docker) -> Option<String> {
        let options = ListNetworksOptions {
            filters: HashMap::from([("name", vec![TRAEFIK_NETWORK])]),
        };
        match docker.list_networks(Some(options)).await {
            Ok(networks) => networks
                .into_iter()
                .find(|n| n.name.as_deref() == Some(TRAEFIK_NETWORK))
                .and_then(|n| n.id),
            Err(e) => {
                warn!(error = %e, "Failed to list networks");
                None
            }
        }
    }

    async fn start_server(&self, docker: &Docker, name: &str) -> Result<()> {
        Self::stop_and_remove(docker, name).await;
        Self::pull_server_image(docker).await;

        let html = self.config.host_deploy_dir.join(name).join("html");
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:/usr/share/nginx/html:ro",
                html.display()
            )]),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(SERVER_IMAGE.to_string()),
            labels: Some(traefik_labels(name, &self.config.domain)),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let container = docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::DeploymentFailed(format!("Failed to create {name}: {e}")))?;

        if let Some(network) = Self::traefik_network_id(docker).await {
            let connect = ConnectNetworkOptions {
                container: container.id.clone(),
                ..Default::default()
            };
            docker
                .connect_network(&network, connect)
                .await
                .map_err(|e| {
                    Error::DeploymentFailed(format!("Failed to attach {name} to network: {e}"))
                })?;
        }

        docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::DeploymentFailed(format!("Failed to start {name}: {e}")))?;

        info!(container = %name, "Started game server");
        Ok(())
    }

    async fn read_title(dir: &Path) -> Option<String> {
        let html = tokio::fs::read_to_string(dir.join("html").join("index.html"))
            .await
            .ok()?;
        extract_title(&html)
    }
}

#[async_trait]
impl Deployer for StaticSiteDeployer {
    fn name(&self) -> &'static str {
        "static-site"
    }

    async fn deploy(
        &self,
        job_id: JobId,
        display_name: &str,
        source_dir: &Path,
    ) -> Result<Deployment> {
        let name = Self::site_name(job_id);
        let deploy_path = self.config.deploy_dir.join(&name);
        let html = deploy_path.join("html");

        if tokio::fs::try_exists(&html).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&html)
                .await
                .map_err(|e| Error::DeploymentFailed(format!("Failed to clear {name}: {e}")))?;
        }

        let src = source_dir.to_path_buf();
        let dst = html.clone();
        let copied = tokio::task::spawn_blocking(move || copy_dir_all(&src, &dst))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .map_err(|e| {
                Error::DeploymentFailed(format!(
                    "Failed to copy {} for {}: {}",
                    source_dir.display(),
                    name,
                    e
                ))
            })?;

        tokio::fs::write(
            deploy_path.join("docker-compose.yml"),
            compose_file(&name, &self.config.domain),
        )
        .await
        .map_err(|e| Error::DeploymentFailed(format!("Failed to write compose file: {e}")))?;

        if let Some(docker) = &self.docker {
            self.start_server(docker, &name).await?;
        }

        info!(job_id = %job_id, game = %display_name, files = copied, "Deployed game");
        Ok(Deployment {
            game_id: job_id,
            url: self.url(&name),
            deploy_path: deploy_path.display().to_string(),
            port: self.port(job_id.get()),
        })
    }

    async fn list_deployed(&self) -> Result<Vec<DeployedGame>> {
        let mut entries = match tokio::fs::read_dir(&self.config.deploy_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::DeploymentFailed(format!(
                    "Failed to read {}: {}",
                    self.config.deploy_dir.display(),
                    e
                )));
            }
        };

        let mut games = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::DeploymentFailed(e.to_string()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(game_id) = parse_game_dir(&name) else {
                continue;
            };
            if !is_dir {
                continue;
            }

            games.push(DeployedGame {
                game_id: JobId::new(game_id),
                title: Self::read_title(&entry.path()).await,
                url: self.url(&name),
                port: self.port(game_id),
                name,
            });
        }

        games.sort_by_key(|g| g.game_id);
        Ok(games)
    }

    async fn remove(&self, job_id: JobId) -> Result<Removal> {
        let name = Self::site_name(job_id);
        if let Some(docker) = &self.docker {
            Self::stop_and_remove(docker, &name).await;
        }

        match tokio::fs::remove_dir_all(self.config.deploy_dir.join(&name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::DeploymentFailed(format!(
                    "Failed to remove {name}: {e}"
                )));
            }
        }

        info!(job_id = %job_id, "Removed game");
        Ok(Removal {
            game_id: job_id,
            removed: true,
        })
    }

    async fn publish_listing(&self, games: &[DeployedGame]) -> Result<()> {
        let json = serde_json::to_string_pretty(games)
            .map_err(|e| Error::Internal(format!("Failed to encode listing: {e}")))?;

        if let Some(parent) = self.config.gallery_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DeploymentFailed(e.to_string()))?;
        }
        tokio::fs::write(&self.config.gallery_path, json)
            .await
            .map_err(|e| {
                Error::DeploymentFailed(format!(
                    "Failed to write {}: {}",
                    self.config.gallery_path.display(),
                    e
                ))
            })?;

        debug!(games = games.len(), "Published gallery listing");
        Ok(())
    }
}

fn parse_game_dir(name: &str) -> Option<i64> {
    GAME_DIR_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}
