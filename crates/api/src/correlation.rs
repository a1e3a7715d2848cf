//! Correlation registry: which live client is waiting for which job.
//!
//! All state sits behind one mutex so that [`CorrelationRegistry::resolve_and_unbind`]
//! is a single critical section. A disconnect racing an incoming completion
//! event therefore sees the binding either before or after resolution, never
//! half-way, and a binding is removed exactly once.
//!
//! The registry also remembers the most recent resolved job ids (bounded,
//! oldest evicted first). Duplicate completion events for those ids are
//! ignored, and late interest registrations are refused with
//! [`BindOutcome::AlreadyResolved`] so the caller can answer from the status
//! store instead.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use docflow_core::types::{ClientId, JobId, UploadId};

use crate::ws::ConnectionId;

/// Default number of resolved job ids remembered.
pub const DEFAULT_RESOLVED_CAPACITY: usize = 10_000;

/// The client interested in a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub client_id: ClientId,
    /// Connection that registered the interest. `None` accepts whichever
    /// connection the client has at delivery time.
    pub conn_id: Option<ConnectionId>,
    pub upload_id: Option<UploadId>,
}

/// Result of [`CorrelationRegistry::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// No previous binding existed.
    Bound,
    /// A previous binding was replaced (last write wins).
    Rebound { previous: ClientId },
    /// The job's completion was already consumed; nothing was bound.
    AlreadyResolved,
}

/// Result of [`CorrelationRegistry::resolve_and_unbind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The binding that was removed.
    Bound(Binding),
    /// Nobody registered interest (or the client already disconnected).
    Unbound,
    /// This job id was already resolved; the event must be ignored.
    Duplicate,
}

#[derive(Default)]
struct Inner {
    bindings: HashMap<JobId, Binding>,
    resolved: HashSet<JobId>,
    resolved_order: VecDeque<JobId>,
}

pub struct CorrelationRegistry {
    inner: Mutex<Inner>,
    resolved_capacity: usize,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_resolved_capacity(DEFAULT_RESOLVED_CAPACITY)
    }

    pub fn with_resolved_capacity(resolved_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            resolved_capacity: resolved_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves the maps consistent, so a poisoned
        // lock still guards valid state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `job_id` to `client_id`, replacing any previous binding.
    pub fn bind(
        &self,
        job_id: JobId,
        client_id: ClientId,
        upload_id: Option<UploadId>,
    ) -> BindOutcome {
        let binding = Binding {
            client_id,
            conn_id: None,
            upload_id,
        };
        self.bind_with(job_id, binding, || {})
    }

    /// Store `binding` for `job_id` and run `on_bound` before the lock is
    /// released.
    ///
    /// `on_bound` only runs when the binding was stored, and a concurrent
    /// [`resolve_and_unbind`](Self::resolve_and_unbind) for the same job sees
    /// the binding only after it returned. It must not block.
    pub fn bind_with<F>(&self, job_id: JobId, binding: Binding, on_bound: F) -> BindOutcome
    where
        F: FnOnce(),
    {
        let mut inner = self.lock();
        if inner.resolved.contains(&job_id) {
            return BindOutcome::AlreadyResolved;
        }

        let client_id = binding.client_id.clone();
        let previous = inner.bindings.insert(job_id.clone(), binding);
        on_bound();
        drop(inner);

        match previous {
            Some(prev) if prev.client_id != client_id => {
                tracing::info!(
                    %job_id,
                    %client_id,
                    previous_client_id = %prev.client_id,
                    "Binding overwritten",
                );
                BindOutcome::Rebound {
                    previous: prev.client_id,
                }
            }
            Some(_) => BindOutcome::Bound,
            None => {
                tracing::debug!(%job_id, %client_id, "Binding created");
                BindOutcome::Bound
            }
        }
    }

    /// Remove and return the binding for `job_id`, marking the job resolved.
    ///
    /// Lookup, removal and the resolved mark happen under one lock.
    pub fn resolve_and_unbind(&self, job_id: &JobId) -> Resolution {
        let mut inner = self.lock();
        if inner.resolved.contains(job_id) {
            return Resolution::Duplicate;
        }

        let binding = inner.bindings.remove(job_id);

        inner.resolved.insert(job_id.clone());
        inner.resolved_order.push_back(job_id.clone());
        while inner.resolved_order.len() > self.resolved_capacity {
            if let Some(evicted) = inner.resolved_order.pop_front() {
                inner.resolved.remove(&evicted);
            }
        }

        match binding {
            Some(binding) => Resolution::Bound(binding),
            None => Resolution::Unbound,
        }
    }

    /// Remove one binding. Removing an absent binding is a no-op.
    pub fn unbind(&self, job_id: &JobId) -> Option<Binding> {
        self.lock().bindings.remove(job_id)
    }

    /// Remove every binding owned by `client_id`. Returns how many were removed.
    pub fn unbind_by_client(&self, client_id: &ClientId) -> usize {
        let mut inner = self.lock();
        let before = inner.bindings.len();
        inner.bindings.retain(|_, b| &b.client_id != client_id);
        before - inner.bindings.len()
    }

    pub fn binding(&self, job_id: &JobId) -> Option<Binding> {
        self.lock().bindings.get(job_id).cloned()
    }

    pub fn is_resolved(&self, job_id: &JobId) -> bool {
        self.lock().resolved.contains(job_id)
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
