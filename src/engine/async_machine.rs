//! Cooperative machine for async hosts.
//!
//! Every trigger runs as a unit of work with its own cancellation token.
//! When a transition passes its conditions it cancels every other unit of
//! the same model, then holds the model's commit lock while it changes
//! state. A cancelled unit stops at its next await point and reports
//! [`Outcome::Superseded`]. A transition that had to wait for the lock only
//! commits if its source state is still active once it gets it.

use super::core::{delegate_core, Definitions, MachineCore, MachineOptions, Resolved};
use super::event::{Arguments, EventData, Outcome};
use super::model::{ModelId, ModelSlot};
use super::scheduler::{
    current_unit, AdmissionMode, PendingTrigger, UnitContext, UnitGuard, UnitId, UnitRegistry,
    CURRENT_UNIT,
};
use crate::core::{lift, run_async, State, Transition};
use crate::error::{CancelReason, MachineError, Phase};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A hierarchical state machine whose callbacks may be asynchronous.
///
/// # Example
///
/// ```rust
/// use canopy::{MachineBuilder, TransitionBuilder};
///
/// struct Job;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let machine = MachineBuilder::<Job>::new()
///     .states(["idle", "running"])
///     .initial("idle")
///     .transition(TransitionBuilder::new("start").from("idle").to("running"))
///     .build_async()
///     .unwrap();
///
/// let job = machine.add_model(Job).unwrap();
/// machine.trigger(job, "start").await.unwrap();
/// assert!(machine.is_state(job, "running", false).unwrap());
/// # }
/// ```
pub struct AsyncMachine<M> {
    pub(crate) core: MachineCore<M>,
    units: UnitRegistry,
}

delegate_core!(AsyncMachine);

impl<M: Send + Sync + 'static> AsyncMachine<M> {
    pub(crate) fn from_definitions(definitions: Definitions<M>) -> Self {
        Self {
            core: MachineCore::new(definitions),
            units: UnitRegistry::default(),
        }
    }

    pub fn options(&self) -> MachineOptions {
        self.core.definitions().options.clone()
    }

    pub async fn trigger(&self, model: ModelId, trigger: &str) -> Result<Outcome, MachineError> {
        self.trigger_with(model, trigger, Arguments::new()).await
    }

    /// Fire `trigger` for one model.
    ///
    /// In immediate mode triggers from different tasks run concurrently and
    /// the first one to pass its conditions supersedes the others. A trigger
    /// fired from inside a running transition of the same model is rejected
    /// with [`MachineError::Concurrency`].
    pub async fn trigger_with(
        &self,
        model: ModelId,
        trigger: &str,
        args: Arguments,
    ) -> Result<Outcome, MachineError> {
        let slot = self.core.slot(model)?;
        match self.core.definitions().options.mode {
            AdmissionMode::Immediate => {
                if self.is_reentrant(model) {
                    return Err(MachineError::Concurrency {
                        trigger: trigger.to_string(),
                    });
                }
                self.run_unit(&slot, trigger, args).await
            }
            AdmissionMode::Queued => {
                let pending = PendingTrigger {
                    trigger: trigger.to_string(),
                    args,
                };
                if !slot.admission.enqueue(pending.clone()) {
                    debug!(model = %model, trigger, "queued trigger behind running transition");
                    return Ok(Outcome::Scheduled);
                }
                self.drain(&slot, pending).await
            }
        }
    }

    /// Fire `trigger` for every attached model concurrently.
    pub async fn dispatch(&self, trigger: &str) -> Result<bool, MachineError> {
        self.dispatch_with(trigger, Arguments::new()).await
    }

    pub async fn dispatch_with(&self, trigger: &str, args: Arguments) -> Result<bool, MachineError> {
        let slots = self.core.slots();
        let outcomes = join_all(
            slots
                .iter()
                .map(|slot| self.trigger_with(slot.id, trigger, args.clone())),
        )
        .await;

        let mut all = true;
        for outcome in outcomes {
            all &= matches!(outcome?, Outcome::Executed | Outcome::Scheduled);
        }
        Ok(all)
    }

    pub async fn may_trigger(&self, model: ModelId, trigger: &str) -> Result<bool, MachineError> {
        self.may_trigger_with(model, trigger, Arguments::new()).await
    }

    /// Whether `trigger` would pass the conditions of some transition from
    /// the model's active states, without changing state.
    ///
    /// Errors raised while checking a candidate are routed to
    /// `on_exception`, which lets the check continue with the next one.
    pub async fn may_trigger_with(
        &self,
        model: ModelId,
        trigger: &str,
        args: Arguments,
    ) -> Result<bool, MachineError> {
        let slot = self.core.slot(model)?;
        let definitions = self.core.definitions();
        let mut event = EventData::new(slot, Arc::clone(&definitions), trigger, args, None);
        event.mode = AdmissionMode::Immediate;

        for (_, source) in definitions.dispatch_paths(&event.slot.tree(), trigger) {
            event.set_source(&source);
            for transition in definitions.events.candidates(trigger, &source) {
                event.transition = Some(Arc::clone(&transition));
                match check_candidate(&definitions, &transition, &event).await {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(err) => {
                        self.handle_error(&mut event, err).await?;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Cancel the model's running transitions. When called from inside one
    /// of them, that one keeps running. Returns how many were cancelled.
    pub fn cancel_running_transitions(&self, model: ModelId) -> usize {
        let keep = current_unit()
            .filter(|context| context.machine == self.core.id && context.model == model)
            .map(|context| context.unit);
        let cancelled = self.units.cancel(model, keep, CancelReason::External);
        if cancelled > 0 {
            info!(model = %model, cancelled, "cancelled running transitions");
        }
        cancelled
    }

    /// Exempt a unit from cancellation, for example while it awaits work
    /// that must not be interrupted.
    pub fn protect(&self, unit: UnitId) {
        self.units.protect(unit);
    }

    pub fn unprotect(&self, unit: UnitId) {
        self.units.unprotect(unit);
    }

    /// Number of units currently running for the model.
    pub fn running_units(&self, model: ModelId) -> usize {
        self.units.running(model)
    }

    fn is_reentrant(&self, model: ModelId) -> bool {
        current_unit()
            .map(|context| context.machine == self.core.id && context.model == model)
            .unwrap_or(false)
    }

    async fn drain(
        &self,
        slot: &Arc<ModelSlot<M>>,
        first: PendingTrigger,
    ) -> Result<Outcome, MachineError> {
        let mut queue = slot.admission.draining();
        let mut outcome = None;
        let mut next = Some(first);
        while let Some(pending) = next {
            let result = self.run_unit(slot, &pending.trigger, pending.args).await?;
            outcome.get_or_insert(result);
            next = queue.advance();
        }
        Ok(outcome.unwrap_or(Outcome::NotExecuted))
    }

    async fn run_unit(
        &self,
        slot: &Arc<ModelSlot<M>>,
        trigger: &str,
        args: Arguments,
    ) -> Result<Outcome, MachineError> {
        let unit = self.units.register(slot.id);
        let context = UnitContext {
            machine: self.core.id,
            model: slot.id,
            unit: unit.id(),
        };
        let definitions = self.core.definitions();
        let mut event = EventData::new(Arc::clone(slot), definitions, trigger, args, Some(unit.id()));
        debug!(
            machine = %event.machine_name(),
            model = %slot.id,
            unit = %unit.id(),
            trigger,
            "processing trigger"
        );

        CURRENT_UNIT
            .scope(context, async {
                let processed = tokio::select! {
                    biased;
                    _ = unit.token().cancelled() => Err(MachineError::Cancelled(unit.reason())),
                    result = self.process(&mut event, &unit) => result,
                };

                let outcome = match processed {
                    Ok(outcome) => Ok(outcome),
                    Err(MachineError::Cancelled(CancelReason::Superseded)) => {
                        debug!(
                            machine = %event.machine_name(),
                            unit = %unit.id(),
                            trigger,
                            "transition superseded"
                        );
                        Ok(Outcome::Superseded)
                    }
                    Err(err @ MachineError::Cancelled(_)) => {
                        event.error = Some(err.clone());
                        Err(err)
                    }
                    Err(err) => self.handle_error(&mut event, err).await,
                };
                self.finalize(&event).await;
                outcome
            })
            .await
    }

    async fn handle_error(
        &self,
        event: &mut EventData<M>,
        err: MachineError,
    ) -> Result<Outcome, MachineError> {
        event.error = Some(err.clone());
        let definitions = Arc::clone(&event.definitions);
        if definitions.hooks.on_exception.is_empty() {
            return Err(err);
        }
        warn!(
            machine = %event.machine_name(),
            trigger = %event.trigger,
            error = %err,
            "routing error to on_exception"
        );
        match run_async(&definitions.hooks.on_exception, event, Phase::Exception).await {
            Ok(()) => Ok(Outcome::NotExecuted),
            Err(hook) => {
                error!(
                    machine = %event.machine_name(),
                    trigger = %event.trigger,
                    error = %hook,
                    "on_exception callback failed"
                );
                Err(err)
            }
        }
    }

    async fn finalize(&self, event: &EventData<M>) {
        let definitions = Arc::clone(&event.definitions);
        if let Err(err) = run_async(&definitions.hooks.finalize_event, event, Phase::Finalize).await {
            warn!(
                machine = %event.machine_name(),
                trigger = %event.trigger,
                error = %err,
                "finalize_event callback failed"
            );
        }
    }

    async fn process(
        &self,
        event: &mut EventData<M>,
        unit: &UnitGuard<'_>,
    ) -> Result<Outcome, MachineError> {
        let definitions = Arc::clone(&event.definitions);
        let separator = definitions.states.separator().to_string();
        let tree = event.slot.tree();
        let mut resolved = Resolved::default();
        let mut matched = false;

        for (path, source) in definitions.dispatch_paths(&tree, &event.trigger) {
            if resolved.contains(&source) || !event.slot.is_active(&path) {
                continue;
            }
            matched = true;
            event.set_source(&source);
            run_async(&definitions.hooks.prepare_event, event, Phase::PrepareEvent).await?;
            if self.attempt(event, &source, unit).await? {
                resolved.mark(&path, &separator);
            }
        }

        if !matched {
            return definitions.unmatched(&tree, &event.trigger);
        }
        Ok(if event.result {
            Outcome::Executed
        } else {
            Outcome::NotExecuted
        })
    }

    async fn attempt(
        &self,
        event: &mut EventData<M>,
        source: &str,
        unit: &UnitGuard<'_>,
    ) -> Result<bool, MachineError> {
        let candidates = event.definitions.events.candidates(&event.trigger, source);
        for transition in candidates {
            event.transition = Some(Arc::clone(&transition));
            if self.execute(event, &transition, source, unit).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn execute(
        &self,
        event: &mut EventData<M>,
        transition: &Transition<M>,
        source: &str,
        unit: &UnitGuard<'_>,
    ) -> Result<bool, MachineError> {
        let definitions = Arc::clone(&event.definitions);
        debug!(
            machine = %event.machine_name(),
            trigger = %event.trigger,
            source,
            target = ?transition.target,
            "initiating transition"
        );

        run_async(&transition.prepare, event, Phase::Prepare).await?;
        if !conditions_hold(transition, event).await? {
            debug!(
                machine = %event.machine_name(),
                trigger = %event.trigger,
                source,
                "transition conditions not met"
            );
            return Ok(false);
        }

        let slot = Arc::clone(&event.slot);
        let superseded = self
            .units
            .cancel(slot.id, Some(unit.id()), CancelReason::Superseded);
        if superseded > 0 {
            debug!(
                machine = %event.machine_name(),
                model = %slot.id,
                superseded,
                "cancelled superseded transitions"
            );
        }

        let _commit = slot.commit.lock().await;
        let _shield = self.units.shield(unit.id());
        if unit.token().is_cancelled() {
            return Err(MachineError::Cancelled(unit.reason()));
        }
        // A unit that committed while this one waited may have left the source.
        let path: Vec<String> = source
            .split(definitions.states.separator())
            .map(str::to_string)
            .collect();
        if !slot.is_active(&path) {
            debug!(
                machine = %event.machine_name(),
                trigger = %event.trigger,
                source,
                "source state left before commit"
            );
            return Ok(false);
        }

        run_async(&definitions.hooks.before_state_change, event, Phase::BeforeStateChange).await?;
        run_async(&transition.before, event, Phase::Before).await?;
        if let Some(dest) = transition.destination(source) {
            self.change_state(event, &dest).await?;
        }
        event.result = true;
        run_async(&transition.after, event, Phase::After).await?;
        run_async(&definitions.hooks.after_state_change, event, Phase::AfterStateChange).await?;
        Ok(true)
    }

    async fn change_state(&self, event: &mut EventData<M>, dest: &str) -> Result<(), MachineError> {
        let definitions = Arc::clone(&event.definitions);
        let plan = MachineCore::plan(&definitions, &event.slot, dest)?;

        for name in &plan.exit {
            let state = definitions.state(name)?;
            event.scope = Some(Arc::clone(&state));
            let exited = exit_state(&state, event).await;
            state.pocket.clear();
            exited?;
        }

        event
            .slot
            .commit_tree(plan.tree.clone(), &event.trigger, definitions.states.separator());

        for name in &plan.enter {
            let state = definitions.state(name)?;
            event.scope = Some(Arc::clone(&state));
            enter_state(&state, event).await?;
        }
        event.scope = None;

        if definitions.reached_final(&plan) {
            run_async(&definitions.hooks.on_final, event, Phase::Final).await?;
        }
        Ok(())
    }
}

async fn check_candidate<M: 'static>(
    definitions: &Definitions<M>,
    transition: &Transition<M>,
    event: &EventData<M>,
) -> Result<bool, MachineError> {
    run_async(&definitions.hooks.prepare_event, event, Phase::PrepareEvent).await?;
    run_async(&transition.prepare, event, Phase::Prepare).await?;
    conditions_hold(transition, event).await
}

async fn conditions_hold<M: 'static>(
    transition: &Transition<M>,
    event: &EventData<M>,
) -> Result<bool, MachineError> {
    for condition in &transition.conditions {
        match condition.check(event).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err @ MachineError::Callback { .. }) => {
                warn!(trigger = %event.trigger, error = %err, "condition failed, rejecting transition");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

async fn exit_state<M: 'static>(state: &State<M>, event: &EventData<M>) -> Result<(), MachineError> {
    for aspect in &state.aspects {
        aspect
            .on_exit(state, event)
            .map_err(|err| lift(Phase::Exit, err))?;
    }
    run_async(&state.on_exit, event, Phase::Exit).await?;
    if let Some(hook) = event.model_hook(&format!("on_exit_{}", state.name)) {
        hook.call(event, Phase::Exit).await?;
    }
    debug!(machine = %event.machine_name(), state = %state.name, "exited state");
    Ok(())
}

async fn enter_state<M: 'static>(state: &State<M>, event: &EventData<M>) -> Result<(), MachineError> {
    for aspect in &state.aspects {
        aspect
            .on_enter(state, event)
            .map_err(|err| lift(Phase::Enter, err))?;
    }
    run_async(&state.on_enter, event, Phase::Enter).await?;
    if let Some(hook) = event.model_hook(&format!("on_enter_{}", state.name)) {
        hook.call(event, Phase::Enter).await?;
    }
    debug!(machine = %event.machine_name(), state = %state.name, "entered state");
    Ok(())
}
