//! Trigger admission and unit-of-work bookkeeping.
//!
//! [`Admission`] serializes triggers for one model, either by rejecting
//! reentrant triggers or by queueing them. [`UnitRegistry`] tracks every
//! in-flight unit of work of an [`AsyncMachine`](crate::AsyncMachine) so that
//! a transition about to commit can cancel the ones it supersedes.

use super::event::Arguments;
use super::model::ModelId;
use crate::error::CancelReason;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a trigger fired while another one is running for the same model is
/// handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Run right away; a reentrant trigger fails with a concurrency error.
    #[default]
    Immediate,
    /// Append to the model's queue and run after the current trigger returns.
    Queued,
}

#[derive(Clone, Debug)]
pub(crate) struct PendingTrigger {
    pub(crate) trigger: String,
    pub(crate) args: Arguments,
}

/// Per-model admission gate.
#[derive(Default)]
pub(crate) struct Admission {
    running: AtomicBool,
    queue: Mutex<VecDeque<PendingTrigger>>,
}

impl Admission {
    /// Claim the model for an immediate trigger.
    pub(crate) fn try_enter(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard { admission: self })
    }

    /// Append a trigger. Returns `true` when the queue was idle, meaning the
    /// caller now owns draining it.
    pub(crate) fn enqueue(&self, pending: PendingTrigger) -> bool {
        let mut queue = self.lock();
        queue.push_back(pending);
        queue.len() == 1
    }

    /// Drop the finished head and hand out the next trigger to run.
    pub(crate) fn advance(&self) -> Option<PendingTrigger> {
        let mut queue = self.lock();
        queue.pop_front();
        queue.front().cloned()
    }

    /// Take ownership of draining the queue after a successful
    /// [`enqueue`](Admission::enqueue).
    pub(crate) fn draining(&self) -> DrainGuard<'_> {
        DrainGuard {
            admission: self,
            finished: false,
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Triggers waiting behind the one currently running.
    pub(crate) fn pending(&self) -> usize {
        self.lock().len().saturating_sub(1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingTrigger>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the running flag when the trigger returns.
pub(crate) struct RunningGuard<'a> {
    admission: &'a Admission,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.admission.running.store(false, Ordering::Release);
    }
}

/// Exclusive right to drain a model's queue.
///
/// Dropped before the queue ran empty, because a trigger failed, panicked or
/// its future was dropped, it discards the remaining triggers so the next
/// enqueue starts a fresh drain.
pub(crate) struct DrainGuard<'a> {
    admission: &'a Admission,
    finished: bool,
}

impl DrainGuard<'_> {
    pub(crate) fn advance(&mut self) -> Option<PendingTrigger> {
        let next = self.admission.advance();
        self.finished = next.is_none();
        next
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut queue = self.admission.lock();
        let dropped = queue.len();
        queue.clear();
        tracing::warn!(dropped, "queue drain stopped early, discarding queued triggers");
    }
}

/// Identifier of one trigger's pipeline execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(Uuid);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MachineId(Uuid);

impl MachineId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct UnitContext {
    pub(crate) machine: MachineId,
    pub(crate) model: ModelId,
    pub(crate) unit: UnitId,
}

tokio::task_local! {
    pub(crate) static CURRENT_UNIT: UnitContext;
}

/// Unit of work the calling task is running, if any.
pub(crate) fn current_unit() -> Option<UnitContext> {
    CURRENT_UNIT.try_with(|context| *context).ok()
}

struct UnitHandle {
    id: UnitId,
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

/// In-flight units of work, grouped by model.
#[derive(Default)]
pub(crate) struct UnitRegistry {
    units: Mutex<HashMap<ModelId, Vec<UnitHandle>>>,
    protected: Mutex<HashSet<UnitId>>,
}

impl UnitRegistry {
    pub(crate) fn register(&self, model: ModelId) -> UnitGuard<'_> {
        let id = UnitId(Uuid::new_v4());
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());
        self.lock_units()
            .entry(model)
            .or_default()
            .push(UnitHandle {
                id,
                token: token.clone(),
                reason: Arc::clone(&reason),
            });
        UnitGuard {
            registry: self,
            model,
            id,
            token,
            reason,
        }
    }

    /// Cancel every unit of `model` except `keep` and protected units.
    /// Returns how many units were signalled.
    pub(crate) fn cancel(&self, model: ModelId, keep: Option<UnitId>, reason: CancelReason) -> usize {
        let protected = self.lock_protected().clone();
        let units = self.lock_units();
        let Some(handles) = units.get(&model) else {
            return 0;
        };
        let mut cancelled = 0;
        for handle in handles {
            if Some(handle.id) == keep || protected.contains(&handle.id) {
                continue;
            }
            if handle.token.is_cancelled() {
                continue;
            }
            let _ = handle.reason.set(reason);
            handle.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Returns `false` when the unit was already protected.
    pub(crate) fn protect(&self, unit: UnitId) -> bool {
        self.lock_protected().insert(unit)
    }

    /// Protect a unit until the returned guard drops. A unit the host
    /// protected explicitly stays protected afterwards.
    pub(crate) fn shield(&self, unit: UnitId) -> Shield<'_> {
        let added = self.protect(unit);
        Shield {
            registry: self,
            unit,
            added,
        }
    }

    pub(crate) fn unprotect(&self, unit: UnitId) {
        self.lock_protected().remove(&unit);
    }

    pub(crate) fn running(&self, model: ModelId) -> usize {
        self.lock_units().get(&model).map(Vec::len).unwrap_or(0)
    }

    fn release(&self, model: ModelId, unit: UnitId) {
        let mut units = self.lock_units();
        if let Some(handles) = units.get_mut(&model) {
            handles.retain(|handle| handle.id != unit);
            if handles.is_empty() {
                units.remove(&model);
            }
        }
        drop(units);
        self.lock_protected().remove(&unit);
    }

    fn lock_units(&self) -> std::sync::MutexGuard<'_, HashMap<ModelId, Vec<UnitHandle>>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_protected(&self) -> std::sync::MutexGuard<'_, HashSet<UnitId>> {
        self.protected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of a running unit; deregisters on drop.
pub(crate) struct UnitGuard<'a> {
    registry: &'a UnitRegistry,
    model: ModelId,
    id: UnitId,
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl UnitGuard<'_> {
    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why the unit was cancelled. Unknown causes count as external.
    pub(crate) fn reason(&self) -> CancelReason {
        self.reason.get().copied().unwrap_or(CancelReason::External)
    }
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(self.model, self.id);
    }
}

pub(crate) struct Shield<'a> {
    registry: &'a UnitRegistry,
    unit: UnitId,
    added: bool,
}

impl Drop for Shield<'_> {
    fn drop(&mut self) {
        if self.added {
            self.registry.unprotect(self.unit);
        }
    }
}
