//! # Scene Host Seam
//!
//! The replica state never touches renderable objects. It asks a
//! [`SceneHost`] to build them and hands attachment back to the host's
//! own thread.
//!
//! ```text
//! network thread                    scene thread
//! ──────────────                    ────────────
//! instantiate(template) ─► handle
//! defer(attach(zone, handle)) ───►  queue ─► run before next frame
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::SceneError;

/// Opaque handle to an object owned by the scene host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);

/// Work to run on the scene-owning thread.
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// The engine side of replication.
///
/// Implementations must be callable from the network thread. Only
/// `instantiate` may be answered synchronously; anything that mutates the
/// live tree belongs in a task passed to `defer`.
pub trait SceneHost: Send + Sync {
    /// Builds a detached instance of `template`.
    fn instantiate(&self, template: &str) -> Result<InstanceHandle, SceneError>;

    /// Attaches `child` under `parent` at `relative_path` (empty = directly under `parent`).
    fn attach(&self, parent: InstanceHandle, child: InstanceHandle, relative_path: &str);

    /// Queues `task` to run on the scene-owning thread.
    fn defer(&self, task: DeferredTask);
}

// ============================================================================
// HEADLESS HOST
// ============================================================================

/// Scene host for processes without an engine.
///
/// Hands out sequential handles and runs deferred tasks when drained.
/// Only counters are kept, so memory stays flat however long the process
/// runs.
#[derive(Default)]
pub struct HeadlessSceneHost {
    next_handle: AtomicU64,
    attachments: AtomicU64,
    deferred: Mutex<VecDeque<DeferredTask>>,
}

impl HeadlessSceneHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every queued task, returning how many ran.
    pub fn run_deferred(&self) -> usize {
        let tasks: Vec<DeferredTask> = self.deferred.lock().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Instances built so far.
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> u64 {
        self.next_handle.load(Ordering::Relaxed)
    }

    /// Attachments performed so far.
    #[inline]
    #[must_use]
    pub fn attachment_count(&self) -> u64 {
        self.attachments.load(Ordering::Relaxed)
    }
}

impl SceneHost for HeadlessSceneHost {
    fn instantiate(&self, _template: &str) -> Result<InstanceHandle, SceneError> {
        Ok(InstanceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn attach(&self, _parent: InstanceHandle, _child: InstanceHandle, _relative_path: &str) {
        self.attachments.fetch_add(1, Ordering::Relaxed);
    }

    fn defer(&self, task: DeferredTask) {
        self.deferred.lock().push_back(task);
    }
}

// ============================================================================
// MOCK IMPLEMENTATIONS (For Testing)
// ============================================================================

/// A recorded `attach` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Parent instance.
    pub parent: InstanceHandle,
    /// Attached instance.
    pub child: InstanceHandle,
    /// Path below the parent.
    pub path: String,
}

/// In-memory scene host.
///
/// Hands out sequential handles, records every call and keeps deferred
/// tasks until [`MockSceneHost::run_deferred`] is called.
#[derive(Default)]
pub struct MockSceneHost {
    next_handle: AtomicU64,
    instantiated: Mutex<Vec<(InstanceHandle, String)>>,
    attachments: Mutex<Vec<Attachment>>,
    deferred: Mutex<VecDeque<DeferredTask>>,
    failing: Mutex<HashSet<String>>,
}

impl MockSceneHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future `instantiate(template)` fail.
    pub fn fail_template(&self, template: impl Into<String>) {
        self.failing.lock().insert(template.into());
    }

    /// Runs every queued task, returning how many ran.
    pub fn run_deferred(&self) -> usize {
        let tasks: Vec<DeferredTask> = self.deferred.lock().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Templates instantiated so far, in order.
    #[must_use]
    pub fn instantiated(&self) -> Vec<(InstanceHandle, String)> {
        self.instantiated.lock().clone()
    }

    /// Attachments performed so far, in order.
    #[must_use]
    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.lock().clone()
    }
}

impl SceneHost for MockSceneHost {
    fn instantiate(&self, template: &str) -> Result<InstanceHandle, SceneError> {
        if self.failing.lock().contains(template) {
            return Err(SceneError::InstantiateFailed(template.to_string()));
        }
        let handle = InstanceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.instantiated.lock().push((handle, template.to_string()));
        Ok(handle)
    }

    fn attach(&self, parent: InstanceHandle, child: InstanceHandle, relative_path: &str) {
        self.attachments.lock().push(Attachment {
            parent,
            child,
            path: relative_path.to_string(),
        });
    }

    fn defer(&self, task: DeferredTask) {
        self.deferred.lock().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_headless_host_counts_without_recording() {
        let host = Arc::new(HeadlessSceneHost::new());
        let parent = host.instantiate("zone").unwrap();
        let child = host.instantiate("crate").unwrap();
        assert_ne!(parent, child);
        assert_eq!(host.instance_count(), 2);

        let scene = Arc::clone(&host);
        host.defer(Box::new(move || scene.attach(parent, child, "")));
        assert_eq!(host.attachment_count(), 0);
        assert_eq!(host.run_deferred(), 1);
        assert_eq!(host.run_deferred(), 0);
        assert_eq!(host.attachment_count(), 1);
    }

    #[test]
    fn test_handles_are_distinct() {
        let host = MockSceneHost::new();
        let a = host.instantiate("a").unwrap();
        let b = host.instantiate("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(host.instantiated().len(), 2);
    }

    #[test]
    fn test_failing_template() {
        let host = MockSceneHost::new();
        host.fail_template("broken");
        assert_eq!(
            host.instantiate("broken"),
            Err(SceneError::InstantiateFailed("broken".to_string()))
        );
    }

    #[test]
    fn test_deferred_runs_only_when_drained() {
        let host = Arc::new(MockSceneHost::new());
        let parent = host.instantiate("zone").unwrap();
        let child = host.instantiate("crate").unwrap();

        let scene = Arc::clone(&host);
        host.defer(Box::new(move || scene.attach(parent, child, "Props")));

        assert!(host.attachments().is_empty());
        assert_eq!(host.pending_tasks(), 1);
        assert_eq!(host.run_deferred(), 1);
        assert_eq!(
            host.attachments(),
            vec![Attachment {
                parent,
                child,
                path: "Props".to_string(),
            }]
        );
    }
}
