use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

/// What a line of service output says about the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    NotebookListening,
    SimulatorListening,
    /// The offending line.
    Failed(String),
}

/// Pattern matcher over textual service output.
pub trait ReadinessDetector: Send + Sync {
    fn detect(&self, line: &str) -> Option<Readiness>;
}

const NOTEBOOK_MARKER: &str = "is running at:";

static FILE_SERVER_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"File server started at https?://\S+").expect("file server marker regex")
});

/// Watches the container's combined output for the kernel server banner.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelLogDetector;

impl ReadinessDetector for KernelLogDetector {
    fn detect(&self, line: &str) -> Option<Readiness> {
        if line.contains(NOTEBOOK_MARKER) {
            return Some(Readiness::NotebookListening);
        }
        if line.to_lowercase().contains("error") {
            return Some(Readiness::Failed(line.to_string()));
        }
        None
    }
}

/// Watches kernel channel frames relayed to the browser for the simulator
/// file server banner printed by the notebook's first cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelOutputDetector;

impl KernelOutputDetector {
    fn output_text(frame: &JsonValue) -> Option<String> {
        let msg_type = frame
            .get("msg_type")
            .or_else(|| frame.pointer("/header/msg_type"))
            .and_then(JsonValue::as_str)?;

        let content = frame.get("content")?;
        match msg_type {
            "stream" => content.get("text").and_then(JsonValue::as_str).map(str::to_string),
            "execute_result" | "display_data" => content
                .pointer("/data/text~1plain")
                .and_then(|v| match v {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Array(parts) => Some(
                        parts
                            .iter()
                            .filter_map(JsonValue::as_str)
                            .collect::<Vec<_>>()
                            .join(""),
                    ),
                    _ => None,
                }),
            _ => None,
        }
    }
}

impl ReadinessDetector for KernelOutputDetector {
    fn detect(&self, line: &str) -> Option<Readiness> {
        // Cheap pre-filter; most kernel frames are status and comm traffic.
        if !line.contains("File server started") {
            return None;
        }

        let text = match serde_json::from_str::<JsonValue>(line) {
            Ok(frame) => Self::output_text(&frame)?,
            Err(_) => line.to_string(),
        };

        FILE_SERVER_MARKER
            .is_match(&text)
            .then_some(Readiness::SimulatorListening)
    }
}
