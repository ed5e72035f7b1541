pub mod constants;
pub mod event;

pub use event::{EventCode, EventRecord, PodEvent};
