use crate::shared::cache::{CacheError, CacheKey, StateCache};
use crate::shared::models::EventCode;

/// An observed lifecycle fact, before it is recorded and broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ContainerStarted,
    ContainerStopped,
    ContainerDestroyed,
    NotebookStarted,
    NotebookStopped,
    SimulatorStarted,
    SimulatorStopped,
}

/// One event to record and publish, plus the flag it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub code: EventCode,
    pub flag: Option<(CacheKey, bool)>,
}

const fn step(code: EventCode, key: CacheKey, on: bool) -> Transition {
    Transition {
        code,
        flag: Some((key, on)),
    }
}

const CONTAINER_STARTED: &[Transition] = &[step(
    EventCode::ContainerStarted,
    CacheKey::ContainerRunning,
    true,
)];

// Services die with their container; clients learn about them first.
const CONTAINER_STOPPED: &[Transition] = &[
    step(EventCode::NotebookStopped, CacheKey::NotebookRunning, false),
    step(
        EventCode::SimulationFileServerStopped,
        CacheKey::SimulatorRunning,
        false,
    ),
    step(EventCode::ContainerStopped, CacheKey::ContainerRunning, false),
];

const CONTAINER_DESTROYED: &[Transition] = &[Transition {
    code: EventCode::ContainerDestroyed,
    flag: None,
}];

const NOTEBOOK_STARTED: &[Transition] = &[step(
    EventCode::NotebookStarted,
    CacheKey::NotebookRunning,
    true,
)];

const NOTEBOOK_STOPPED: &[Transition] = &[step(
    EventCode::NotebookStopped,
    CacheKey::NotebookRunning,
    false,
)];

const SIMULATOR_STARTED: &[Transition] = &[step(
    EventCode::SimulationFileServerStarted,
    CacheKey::SimulatorRunning,
    true,
)];

const SIMULATOR_STOPPED: &[Transition] = &[step(
    EventCode::SimulationFileServerStopped,
    CacheKey::SimulatorRunning,
    false,
)];

/// Ordered notifications emitted for a signal.
pub fn transitions(signal: Signal) -> &'static [Transition] {
    match signal {
        Signal::ContainerStarted => CONTAINER_STARTED,
        Signal::ContainerStopped => CONTAINER_STOPPED,
        Signal::ContainerDestroyed => CONTAINER_DESTROYED,
        Signal::NotebookStarted => NOTEBOOK_STARTED,
        Signal::NotebookStopped => NOTEBOOK_STOPPED,
        Signal::SimulatorStarted => SIMULATOR_STARTED,
        Signal::SimulatorStopped => SIMULATOR_STOPPED,
    }
}

/// The three lifecycle flags of one pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodState {
    pub container: bool,
    pub notebook: bool,
    pub simulator: bool,
}

impl PodState {
    pub async fn from_cache(cache: &dyn StateCache, uid: &str) -> Result<Self, CacheError> {
        Ok(Self {
            container: cache.get_flag(uid, CacheKey::ContainerRunning).await?,
            notebook: cache.get_flag(uid, CacheKey::NotebookRunning).await?,
            simulator: cache.get_flag(uid, CacheKey::SimulatorRunning).await?,
        })
    }

    pub fn apply(&mut self, signal: Signal) {
        for transition in transitions(signal) {
            if let Some((key, on)) = transition.flag {
                match key {
                    CacheKey::ContainerRunning => self.container = on,
                    CacheKey::NotebookRunning => self.notebook = on,
                    CacheKey::SimulatorRunning => self.simulator = on,
                    _ => {}
                }
            }
        }
    }
}
