use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    },
    models::{EventMessageTypeEnum, HostConfig, Mount, MountTypeEnum},
    system::EventsOptions,
    volume::CreateVolumeOptions,
    Docker,
};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The object does not exist; callers treat this as absent state.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("container runtime error: {0}")]
    Api(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            other => RuntimeError::Api(other.to_string()),
        }
    }
}

/// A lifecycle event in the runtime's JSON event format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuntimeEvent {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventActor {
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub fn actor_name(&self) -> Option<&str> {
        self.actor.attributes.get("name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub network: String,
    pub volume: String,
    pub mount_path: String,
    pub platform: Option<String>,
    pub labels: HashMap<String, String>,
    pub limits: Option<ResourceLimits>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    pub image_id: String,
}

pub type RuntimeStream<T> = BoxStream<'static, Result<T, RuntimeError>>;

/// The operations the orchestrator needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError>;
    async fn create_volume(&self, name: &str, labels: HashMap<String, String>)
        -> Result<(), RuntimeError>;
    /// `None` when the container does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;
    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;
    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError>;
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;
    async fn image_id(&self, image: &str) -> Result<String, RuntimeError>;
    /// Container lifecycle events for every container on the host.
    fn events(&self) -> RuntimeStream<RuntimeEvent>;
    /// Follows combined stdout/stderr, one item per line.
    fn logs(&self, name: &str, since: i64) -> RuntimeStream<String>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_socket_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) => match RuntimeError::from(e) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            driver_opts: HashMap::new(),
            labels,
        };
        self.docker.create_volume(options).await?;
        info!("Created volume {}", name);
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => Ok(Some(ContainerStatus {
                running: info.state.and_then(|s| s.running).unwrap_or(false),
                image_id: info.image.unwrap_or_default(),
            })),
            Err(e) => match RuntimeError::from(e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            mounts: Some(vec![Mount {
                typ: Some(MountTypeEnum::VOLUME),
                source: Some(spec.volume.clone()),
                target: Some(spec.mount_path.clone()),
                read_only: Some(false),
                ..Default::default()
            }]),
            ..Default::default()
        };

        if let Some(limits) = &spec.limits {
            host_config.memory = Some(limits.memory_bytes);
            host_config.memory_swap = Some(limits.memory_bytes);
            host_config.nano_cpus = Some(limits.nano_cpus);
            host_config.runtime = limits.runtime.clone();
        }

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: spec.platform.clone(),
        };

        self.docker.create_container(Some(options), config).await?;
        info!("Created container {} from image {}", spec.name, spec.image);
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker.start_container::<String>(name, None).await?;
        info!("Started container {}", name);
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await?;
        info!("Stopped container {}", name);
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        info!("Removed container {}", name);
        Ok(())
    }

    async fn image_id(&self, image: &str) -> Result<String, RuntimeError> {
        let inspect = self.docker.inspect_image(image).await?;
        inspect
            .id
            .ok_or_else(|| RuntimeError::Api(format!("image {} has no id", image)))
    }

    fn events(&self) -> RuntimeStream<RuntimeEvent> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        self.docker
            .events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }))
            .map(|item| {
                item.map_err(RuntimeError::from).map(|message| {
                    let kind = match message.typ {
                        Some(EventMessageTypeEnum::CONTAINER) => "container".to_string(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    RuntimeEvent {
                        kind,
                        action: message.action.unwrap_or_default(),
                        actor: EventActor {
                            attributes: message
                                .actor
                                .and_then(|actor| actor.attributes)
                                .unwrap_or_default(),
                        },
                    }
                })
            })
            .boxed()
    }

    fn logs(&self, name: &str, since: i64) -> RuntimeStream<String> {
        debug!("Following logs of {} since {}", name, since);
        let chunks = self
            .docker
            .logs::<String>(
                name,
                Some(LogsOptions {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    since,
                    ..Default::default()
                }),
            )
            .map(|chunk| {
                chunk
                    .map(|output| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                    .map_err(RuntimeError::from)
            });
        log_lines(chunks)
    }
}

/// Reassembles lines that the daemon splits across log frames.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Returns the lines completed by `chunk`; a trailing fragment is kept.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let Some(end) = self.partial.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split_terminator('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.partial);
        let tail = tail.trim_end_matches('\r');
        (!tail.is_empty()).then(|| tail.to_string())
    }
}

/// Turns raw log chunks into non-empty lines, flushing the last fragment when
/// the stream ends.
pub fn log_lines<S>(chunks: S) -> RuntimeStream<String>
where
    S: Stream<Item = Result<String, RuntimeError>> + Send + 'static,
{
    chunks
        .map(Some)
        .chain(stream::once(future::ready(None)))
        .scan(LineBuffer::default(), |buffer, chunk| {
            let lines: Vec<Result<String, RuntimeError>> = match chunk {
                Some(Ok(text)) => buffer.push(&text).into_iter().map(Ok).collect(),
                Some(Err(e)) => vec![Err(e)],
                None => buffer.finish().into_iter().map(Ok).collect(),
            };
            future::ready(Some(stream::iter(lines)))
        })
        .flatten()
        .filter(|line| future::ready(!matches!(line, Ok(l) if l.is_empty())))
        .boxed()
}
