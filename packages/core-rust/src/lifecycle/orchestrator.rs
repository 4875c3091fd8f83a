//! Start and stop sequencing over a resolved [`ComponentGraph`].
//!
//! Start runs level by level with every hook of a level in flight at once.
//! Stop walks the exact reverse of the start order one hook at a time, each
//! bounded by its own timeout, and keeps going past failures.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use super::component::StopContext;
use super::error::{ShutdownError, StartError};
use super::graph::{ComponentGraph, GraphState};

impl ComponentGraph {
    /// Runs every start hook exactly once, dependencies first.
    ///
    /// Components of the same level start concurrently. If any hook fails,
    /// later levels are never started and every component that did start is
    /// stopped again in reverse order before the error is returned.
    ///
    /// # Errors
    ///
    /// [`StartError::AlreadyStarted`] if the graph left the `Resolved` state,
    /// [`StartError::ComponentFailed`] for the first hook that failed.
    pub async fn start(&self) -> Result<(), StartError> {
        {
            let mut state = self.state.lock();
            if *state != GraphState::Resolved {
                return Err(StartError::AlreadyStarted);
            }
            *state = GraphState::Starting;
        }

        let started_at = Instant::now();
        for level in &self.levels {
            let results = join_all(level.iter().map(|&i| self.start_node(i))).await;

            let mut failure = None;
            for (&i, result) in level.iter().zip(results) {
                if let Err(source) = result {
                    error!(
                        component = %self.nodes[i].name,
                        error = %format!("{source:#}"),
                        "component failed to start"
                    );
                    failure.get_or_insert((i, source));
                }
            }

            if let Some((i, source)) = failure {
                warn!("rolling back started components");
                for err in self.stop_started(self.rollback_timeout).await {
                    warn!(error = %err, "rollback stop failed");
                }
                *self.state.lock() = GraphState::Stopped;
                return Err(StartError::ComponentFailed {
                    component: self.nodes[i].name.clone(),
                    source,
                });
            }
        }

        *self.state.lock() = GraphState::Running;
        info!(
            components = self.nodes.len(),
            elapsed_ms = started_at.elapsed().as_millis(),
            "all components started"
        );
        Ok(())
    }

    /// Runs the stop hooks of every started component in reverse start order.
    ///
    /// Each hook gets `per_component_timeout`; a hook that fails, panics, or
    /// overruns is recorded and the next one still runs. Stopping a graph that
    /// was never started, or was already stopped, does nothing.
    pub async fn stop(&self, per_component_timeout: Duration) -> Vec<ShutdownError> {
        {
            let mut state = self.state.lock();
            match *state {
                GraphState::Stopped => return Vec::new(),
                GraphState::Resolved => {
                    *state = GraphState::Stopped;
                    return Vec::new();
                }
                GraphState::Stopping => return vec![ShutdownError::AlreadyStopping],
                GraphState::Starting => return vec![ShutdownError::StartInProgress],
                GraphState::Running => *state = GraphState::Stopping,
            }
        }

        let errors = self.stop_started(per_component_timeout).await;
        *self.state.lock() = GraphState::Stopped;
        if errors.is_empty() {
            info!("all components stopped");
        } else {
            warn!(failures = errors.len(), "components stopped with errors");
        }
        errors
    }

    async fn start_node(&self, i: usize) -> anyhow::Result<()> {
        let node = &self.nodes[i];
        if let Some(hooks) = &node.hooks {
            debug!(component = %node.name, "starting component");
            let started_at = Instant::now();
            AssertUnwindSafe(hooks.start())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("start hook panicked")))?;
            info!(
                component = %node.name,
                elapsed_ms = started_at.elapsed().as_millis(),
                "component started"
            );
        }
        node.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop_started(&self, timeout: Duration) -> Vec<ShutdownError> {
        let mut errors = Vec::new();

        for &i in self.levels.iter().flatten().rev() {
            let node = &self.nodes[i];
            if !node.started.swap(false, Ordering::AcqRel) {
                continue;
            }
            let Some(hooks) = &node.hooks else {
                continue;
            };

            let ctx = StopContext::with_budget(timeout);
            let outcome = tokio::time::timeout_at(
                ctx.deadline(),
                AssertUnwindSafe(hooks.stop(&ctx)).catch_unwind(),
            )
            .await;

            let component = node.name.clone();
            match outcome {
                Ok(Ok(Ok(()))) => info!(component = %component, "component stopped"),
                Ok(Ok(Err(source))) => {
                    error!(component = %component, error = %format!("{source:#}"), "component failed to stop");
                    errors.push(ShutdownError::Failed { component, source });
                }
                Ok(Err(_)) => {
                    error!(component = %component, "component panicked while stopping");
                    errors.push(ShutdownError::Panicked { component });
                }
                Err(_) => {
                    error!(component = %component, ?timeout, "component stop timed out");
                    errors.push(ShutdownError::TimedOut { component, timeout });
                }
            }
        }

        errors
    }
}
