//! Descriptors for the workloads reported by a container runtime.
//!
//! The cache hands these out as-is. They are never filtered, merged or otherwise transformed
//! on their way from the [`WorkloadSource`](crate::source::WorkloadSource) to the caller.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The lifecycle state of a single container.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// The container process is alive.
    Running,
    /// The container has terminated.
    Exited,
    /// The runtime did not report a state we understand.
    #[default]
    Unknown,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ContainerState::Running => f.write_str("running"),
            ContainerState::Exited => f.write_str("exited"),
            ContainerState::Unknown => f.write_str("unknown"),
        }
    }
}

/// A container belonging to a [`Workload`].
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Container {
    /// Runtime specific container ID.
    pub id: String,
    /// Name of the container within its workload.
    pub name: String,
    /// The image the container was started from.
    pub image: String,
    /// Hash of the container spec, used by callers to detect spec changes.
    #[serde(default)]
    pub hash: u64,
    /// When the runtime created the container.
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub state: ContainerState,
}

/// A group of containers managed together, as enumerated by the runtime.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Workload {
    /// Unique ID of the workload.
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

impl Workload {
    /// The name under which the runtime knows this workload, `{name}_{namespace}`.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }

    /// Looks up a container of this workload by its name.
    pub fn find_container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}
