/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::fdbkube::api::cluster::FoundationDBCluster;
use crate::fdbkube::controller::runtime::ControllerRuntime;
use crate::fdbkube::util::new_error;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Execution context shared across reconciliation steps.
///
/// The context exposes the underlying `ControllerRuntime` so steps can
/// resolve their collaborators from the dependency registry.
pub struct ReconcileContext<'a> {
    runtime: &'a ControllerRuntime,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(runtime: &'a ControllerRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &'a ControllerRuntime {
        self.runtime
    }

    /// Looks up a dependency that was previously registered with the runtime.
    pub fn dependency<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.runtime.dependency::<T>()
    }

    /// Looks up a trait-object dependency registered through a [`DependencyHandle`].
    pub fn handle<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.dependency::<DependencyHandle<T>>()
            .map(|handle| handle.get())
    }

    /// Like [`ReconcileContext::handle`], but turns a missing registration
    /// into a requeue naming the collaborator.
    pub fn require<T>(&self, what: &str) -> Result<Arc<T>, Requeue>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.handle::<T>().ok_or_else(|| {
            Requeue::with_error(Arc::from(new_error(format!(
                "{} dependency is not registered",
                what
            ))))
        })
    }
}

/// Wrapper that stores an `Arc<T>` while remaining `Sized`, enabling trait-object dependencies.
pub struct DependencyHandle<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: ?Sized> DependencyHandle<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.inner)
    }
}

impl<T: ?Sized> Clone for DependencyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Signal that a cluster needs another reconciliation pass.
///
/// A delayed requeue lets the remaining steps of the pass run first; any
/// other requeue ends the pass immediately.
#[derive(Clone, Debug)]
pub struct Requeue {
    pub message: String,
    pub delay: Option<Duration>,
    pub delayed: bool,
    pub error: Option<Arc<dyn Error + Send + Sync>>,
}

impl Requeue {
    pub fn immediate(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            delay: None,
            delayed: false,
            error: None,
        }
    }

    pub fn with_error(error: Arc<dyn Error + Send + Sync>) -> Self {
        Self {
            message: error.to_string(),
            delay: None,
            delayed: false,
            error: Some(error),
        }
    }

    pub fn delayed(message: impl Into<String>, delay: Duration) -> Self {
        Self {
            message: message.into(),
            delay: Some(delay),
            delayed: true,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Display for Requeue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.delay {
            Some(delay) => write!(f, "requeue after {:?}: {}", delay, self.message),
            None => write!(f, "requeue: {}", self.message),
        }
    }
}

/// One step of a cluster reconciliation pass.
pub trait ReconcileStep: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    fn reconcile(&self, ctx: &ReconcileContext, cluster: &FoundationDBCluster) -> Option<Requeue>;
}

/// Ordered list of steps executed for every pass.
pub struct ClusterReconciler {
    steps: Vec<Box<dyn ReconcileStep>>,
}

impl ClusterReconciler {
    pub fn new(steps: Vec<Box<dyn ReconcileStep>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs every step in order. A non-delayed requeue stops the pass and is
    /// returned as is; delayed requeues are collected and the one with the
    /// shortest delay is returned once all steps ran.
    pub fn run(&self, ctx: &ReconcileContext, cluster: &FoundationDBCluster) -> Option<Requeue> {
        let mut earliest_delayed: Option<Requeue> = None;
        for step in &self.steps {
            let Some(requeue) = step.reconcile(ctx, cluster) else {
                continue;
            };
            if !requeue.delayed {
                return Some(requeue);
            }
            let delay = requeue.delay.unwrap_or_default();
            earliest_delayed = match earliest_delayed {
                Some(current) if current.delay.unwrap_or_default() <= delay => Some(current),
                _ => Some(requeue),
            };
        }
        earliest_delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdbkube::api::cluster::ClusterSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedStep {
        name: &'static str,
        result: Option<Requeue>,
        runs: Arc<AtomicUsize>,
    }

    impl ReconcileStep for ScriptedStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn reconcile(&self, _: &ReconcileContext, _: &FoundationDBCluster) -> Option<Requeue> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn step(
        name: &'static str,
        result: Option<Requeue>,
        runs: &Arc<AtomicUsize>,
    ) -> Box<dyn ReconcileStep> {
        Box::new(ScriptedStep {
            name,
            result,
            runs: Arc::clone(runs),
        })
    }

    #[test]
    fn immediate_requeue_stops_the_pass() {
        let runtime = ControllerRuntime::with_capacity(4);
        let ctx = runtime.context();
        let runs = Arc::new(AtomicUsize::new(0));
        let reconciler = ClusterReconciler::new(vec![
            step("first", Some(Requeue::immediate("stop")), &runs),
            step("second", None, &runs),
        ]);
        let cluster = FoundationDBCluster::new(None, "sample", ClusterSpec::default());

        let requeue = reconciler.run(&ctx, &cluster).expect("requeue");
        assert_eq!(requeue.message, "stop");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_requeues_let_later_steps_run() {
        let runtime = ControllerRuntime::with_capacity(4);
        let ctx = runtime.context();
        let runs = Arc::new(AtomicUsize::new(0));
        let reconciler = ClusterReconciler::new(vec![
            step("slow", Some(Requeue::delayed("slow", Duration::from_secs(30))), &runs),
            step("fast", Some(Requeue::delayed("fast", Duration::from_secs(5))), &runs),
            step("last", None, &runs),
        ]);
        let cluster = FoundationDBCluster::new(None, "sample", ClusterSpec::default());

        let requeue = reconciler.run(&ctx, &cluster).expect("requeue");
        assert_eq!(requeue.message, "fast");
        assert_eq!(requeue.delay, Some(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(reconciler.step_names(), vec!["slow", "fast", "last"]);
    }

    #[test]
    fn requeue_display_keeps_sub_second_delays() {
        let fast = Requeue::delayed("warming up", Duration::from_millis(10));
        assert_eq!(fast.to_string(), "requeue after 10ms: warming up");
        let slow = Requeue::delayed("quota", Duration::from_secs(60));
        assert_eq!(slow.to_string(), "requeue after 60s: quota");
        assert_eq!(Requeue::immediate("now").to_string(), "requeue: now");
    }

    #[test]
    fn missing_dependency_becomes_error_requeue() {
        let runtime = ControllerRuntime::with_capacity(4);
        let ctx = runtime.context();
        let err = ctx
            .require::<dyn ReconcileStep>("step")
            .err()
            .expect("missing dependency");
        assert!(err.is_error());
        assert!(err.message.contains("step dependency"));
    }
}
