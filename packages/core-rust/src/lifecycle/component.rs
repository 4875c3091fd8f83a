//! Component hooks and the descriptor that registers them with the graph.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Lifecycle hooks of a constructed component.
///
/// Components are built by an explicit, typed bootstrap sequence; the graph
/// only decides *when* their hooks run. Both hooks default to no-ops so that
/// passive components (configuration, logger handles) need no implementation.
#[async_trait]
pub trait Component: Send + Sync {
    /// Brings the component up. Must not block for the lifetime of the
    /// component: long-running loops are spawned, not awaited.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tears the component down, finishing before `ctx.deadline()`.
    async fn stop(&self, ctx: &StopContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Time budget handed to a stop hook.
#[derive(Debug, Clone, Copy)]
pub struct StopContext {
    deadline: Instant,
}

impl StopContext {
    /// Creates a context whose budget ends `budget` from now.
    #[must_use]
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    /// Instant at which the orchestrator abandons the hook.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

// ---------------------------------------------------------------------------
// ComponentDescriptor
// ---------------------------------------------------------------------------

/// A named node of the component graph.
pub struct ComponentDescriptor {
    pub(crate) name: String,
    pub(crate) depends_on: Vec<String>,
    pub(crate) hooks: Option<Arc<dyn Component>>,
}

impl ComponentDescriptor {
    /// Registers `component` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, component: Arc<dyn Component>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            hooks: Some(component),
        }
    }

    /// Registers a component that takes part in ordering but has no hooks.
    #[must_use]
    pub fn passive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            hooks: None,
        }
    }

    /// Declares the components that must finish starting before this one.
    #[must_use]
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("has_hooks", &self.hooks.is_some())
            .finish()
    }
}
