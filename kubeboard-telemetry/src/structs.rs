use std::fmt;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

/// One container inside a pod; the identity a log tab or a container-level
/// metric series is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// A monitored entity. Stable identity for one history series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub enum EntityRef {
    Node(String),
    Container(ContainerRef),
}

impl EntityRef {
    pub fn node<S: Into<String>>(name: S) -> Self {
        EntityRef::Node(name.into())
    }

    pub fn container<S: Into<String>>(namespace: S, pod: S, container: S) -> Self {
        EntityRef::Container(ContainerRef {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        })
    }
}

/// Soft backend availability, surfaced per poller. Degrading never stops a
/// poller; it is a hint for the presentation layer only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    Live,
    Unavailable,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Node(name) => write!(f, "node/{name}"),
            EntityRef::Container(c) => c.fmt(f),
        }
    }
}
