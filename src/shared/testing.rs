//! In-memory stand-ins for every external seam, used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::shared::cache::{cache_key, CacheError, CacheKey, StateCache};
use crate::shared::config::NbpodConfig;
use crate::shared::event_log::{EventLog, EventLogError};
use crate::shared::jobs::{Job, JobError, JobQueue};
use crate::shared::models::constants::CACHE_NAMESPACE;
use crate::shared::models::{EventCode, EventRecord, PodEvent};
use crate::shared::pubsub::{Broadcaster, EventStream, PubSubError};
use crate::shared::runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError, RuntimeEvent, RuntimeStream,
};
use crate::shared::services::Services;
use crate::shared::transitions::PodState;

pub const INITIAL_IMAGE_ID: &str = "sha256:initial";

#[derive(Debug, Clone, PartialEq)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
    pub image_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub volumes: HashSet<String>,
    pub containers: HashMap<String, FakeContainer>,
    pub images: HashMap<String, String>,
}

pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    events: Mutex<Vec<Result<RuntimeEvent, RuntimeError>>>,
    log_lines: Mutex<Vec<String>>,
    log_requests: Mutex<Vec<(String, i64)>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        let mut state = RuntimeState::default();
        state
            .images
            .insert("nb-simple".to_string(), INITIAL_IMAGE_ID.to_string());
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            events: Mutex::new(Vec::new()),
            log_lines: Mutex::new(Vec::new()),
            log_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRuntime {
    pub fn snapshot(&self) -> RuntimeState {
        self.state.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn fail_on(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn retag_image(&self, image: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(image.to_string(), id.to_string());
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.events.lock().unwrap().push(Ok(event));
    }

    pub fn push_event_error(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Err(RuntimeError::Api(message.to_string())));
    }

    pub fn push_log_lines(&self, lines: &[&str]) {
        self.log_lines
            .lock()
            .unwrap()
            .extend(lines.iter().map(|l| l.to_string()));
    }

    pub fn log_requests(&self) -> Vec<(String, i64)> {
        self.log_requests.lock().unwrap().clone()
    }

    fn record(&self, op: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(op.to_string());
        if self.failing.lock().unwrap().contains(op) {
            return Err(RuntimeError::Api(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record("volume_exists")?;
        Ok(self.state.lock().unwrap().volumes.contains(name))
    }

    async fn create_volume(
        &self,
        name: &str,
        _labels: HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        self.record("create_volume")?;
        self.state.lock().unwrap().volumes.insert(name.to_string());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        self.record("inspect_container")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| ContainerStatus {
                running: c.running,
                image_id: c.image_id.clone(),
            }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.record("create_container")?;
        let mut state = self.state.lock().unwrap();
        let image_id = state
            .images
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("image {}", spec.image)))?;
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
                image_id,
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("start_container")?;
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("stop_container")?;
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("remove_container")?;
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn image_id(&self, image: &str) -> Result<String, RuntimeError> {
        self.record("image_id")?;
        self.state
            .lock()
            .unwrap()
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("image {}", image)))
    }

    fn events(&self) -> RuntimeStream<RuntimeEvent> {
        let scripted = std::mem::take(&mut *self.events.lock().unwrap());
        stream::iter(scripted).boxed()
    }

    fn logs(&self, name: &str, since: i64) -> RuntimeStream<String> {
        self.log_requests
            .lock()
            .unwrap()
            .push((name.to_string(), since));
        let lines = std::mem::take(&mut *self.log_lines.lock().unwrap());
        stream::iter(lines.into_iter().map(Ok)).boxed()
    }
}

#[derive(Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl StateCache for MemoryCache {
    async fn set(&self, uid: &str, key: CacheKey, value: &str) -> Result<(), CacheError> {
        self.values
            .lock()
            .unwrap()
            .insert(cache_key(uid, key), value.to_string());
        Ok(())
    }

    async fn get(&self, uid: &str, key: CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.values.lock().unwrap().get(&cache_key(uid, key)).cloned())
    }

    async fn has(&self, uid: &str, key: CacheKey) -> Result<bool, CacheError> {
        Ok(self.values.lock().unwrap().contains_key(&cache_key(uid, key)))
    }

    async fn clear(&self, uid: &str) -> Result<(), CacheError> {
        let prefix = format!("{CACHE_NAMESPACE}.{uid}.");
        self.values
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<EventRecord>>,
    failing: Mutex<bool>,
}

impl MemoryEventLog {
    pub fn fail_appends(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, uid: &str, code: EventCode) -> Result<EventRecord, EventLogError> {
        if *self.failing.lock().unwrap() {
            return Err(EventLogError::UnknownCode(code.to_string()));
        }
        let mut records = self.records.lock().unwrap();
        let latest = records
            .iter()
            .filter(|r| r.uid == uid)
            .map(|r| r.created_at)
            .max();
        let now = Utc::now();
        let record = EventRecord {
            code,
            uid: uid.to_string(),
            created_at: latest.map_or(now, |latest| latest.max(now)),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, uid: &str, limit: u32) -> Result<Vec<EventRecord>, EventLogError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.uid == uid)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBroadcaster {
    topics: Mutex<HashMap<String, broadcast::Sender<PodEvent>>>,
    published: Mutex<Vec<(String, PodEvent)>>,
    flag_source: Mutex<Option<Arc<dyn StateCache>>>,
    observed: Mutex<Vec<PodState>>,
    failing: Mutex<bool>,
}

impl MemoryBroadcaster {
    fn sender(&self, uid: &str) -> broadcast::Sender<PodEvent> {
        self.topics
            .lock()
            .unwrap()
            .entry(uid.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    pub fn published(&self, uid: &str) -> Vec<PodEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic_uid, _)| topic_uid == uid)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Records the cached flags at the moment of every publish.
    pub fn watch_flags(&self, cache: Arc<dyn StateCache>) {
        *self.flag_source.lock().unwrap() = Some(cache);
    }

    pub fn observed_flags(&self) -> Vec<PodState> {
        self.observed.lock().unwrap().clone()
    }

    pub fn fail_publishes(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn subscriber_count(&self, uid: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(uid)
            .map_or(0, |sender| sender.receiver_count())
    }
}

#[async_trait]
impl Broadcaster for MemoryBroadcaster {
    async fn publish(&self, uid: &str, event: &PodEvent) -> Result<(), PubSubError> {
        if *self.failing.lock().unwrap() {
            return Err(PubSubError::Backend(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "broadcaster offline",
            ))));
        }

        let source = self.flag_source.lock().unwrap().clone();
        if let Some(cache) = source {
            let state = PodState::from_cache(cache.as_ref(), uid)
                .await
                .unwrap_or_default();
            self.observed.lock().unwrap().push(state);
        }

        self.published
            .lock()
            .unwrap()
            .push((uid.to_string(), event.clone()));
        let _ = self.sender(uid).send(event.clone());
        Ok(())
    }

    async fn subscribe(&self, uid: &str) -> Result<EventStream, PubSubError> {
        let rx = self.sender(uid).subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl MemoryJobQueue {
    pub fn pending(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), JobError> {
        self.jobs.lock().unwrap().push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, JobError> {
        Ok(self.jobs.lock().unwrap().pop_front())
    }
}

/// Services wired to fakes, with typed handles kept for assertions.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub cache: Arc<MemoryCache>,
    pub events: Arc<MemoryEventLog>,
    pub broadcaster: Arc<MemoryBroadcaster>,
    pub jobs: Arc<MemoryJobQueue>,
    pub services: Arc<Services>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(NbpodConfig::default())
    }

    pub fn with_config(config: NbpodConfig) -> Self {
        let runtime = Arc::new(FakeRuntime::default());
        let cache = Arc::new(MemoryCache::default());
        let events = Arc::new(MemoryEventLog::default());
        let broadcaster = Arc::new(MemoryBroadcaster::default());
        let jobs = Arc::new(MemoryJobQueue::default());
        let services = Arc::new(Services::from_parts(
            config,
            runtime.clone(),
            cache.clone(),
            events.clone(),
            broadcaster.clone(),
            jobs.clone(),
        ));
        Self {
            runtime,
            cache,
            events,
            broadcaster,
            jobs,
            services,
        }
    }
}
