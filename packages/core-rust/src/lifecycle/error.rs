//! Errors raised while resolving, starting, and stopping a component graph.

use std::time::Duration;

/// The descriptor set does not form a valid graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("component `{name}` is registered more than once")]
    DuplicateComponent { name: String },

    #[error("component `{component}` depends on unregistered component `{dependency}`")]
    MissingDependency {
        component: String,
        dependency: String,
    },

    #[error("dependency cycle between components: {}", components.join(", "))]
    CycleDetected { components: Vec<String> },
}

/// Startup was refused or aborted.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("component graph has already been started")]
    AlreadyStarted,

    #[error("component `{component}` failed to start: {source:#}")]
    ComponentFailed {
        component: String,
        #[source]
        source: anyhow::Error,
    },
}

/// One stop hook that did not complete cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("component `{component}` failed to stop: {source:#}")]
    Failed {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("component `{component}` did not stop within {timeout:?}")]
    TimedOut { component: String, timeout: Duration },

    #[error("component `{component}` panicked while stopping")]
    Panicked { component: String },

    #[error("component graph is already stopping")]
    AlreadyStopping,

    #[error("component graph is still starting")]
    StartInProgress,
}

impl ShutdownError {
    /// Name of the component the error belongs to, if any.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Failed { component, .. }
            | Self::TimedOut { component, .. }
            | Self::Panicked { component } => Some(component),
            Self::AlreadyStopping | Self::StartInProgress => None,
        }
    }
}
