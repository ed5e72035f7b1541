// Naming contracts shared with the sandbox image and the browser client
pub const CONTAINER_PREFIX: &str = "nb-";
pub const CACHE_NAMESPACE: &str = "demo";
pub const JOB_QUEUE_KEY: &str = "nbpod:jobs";

// Fixed service ports inside every sandbox container
pub const NOTEBOOK_PORT: u16 = 8888;
pub const SIMULATOR_PORT: u16 = 2121;
pub const FILE_SERVER_PORT: u16 = 1337;

// Browser-facing paths
pub const SIMULATOR_PREFIX: &str = "/simulator";
pub const NOTEBOOK_IFRAME_URL: &str = "/notebook/notebooks/notebook.ipynb";
pub const SIMULATOR_IFRAME_URL: &str = "/simulator/";

pub fn container_name(uid: &str) -> String {
    format!("{CONTAINER_PREFIX}{uid}")
}

pub fn volume_name(uid: &str) -> String {
    format!("user-{uid}-volume")
}

pub fn topic_name(uid: &str) -> String {
    format!("user-{uid}")
}

/// Inverse of [`container_name`]; `None` for containers this system does not own.
pub fn uid_from_container_name(name: &str) -> Option<&str> {
    name.trim_start_matches('/')
        .strip_prefix(CONTAINER_PREFIX)
        .filter(|uid| !uid.is_empty())
}
