//! Blocking machine.
//!
//! [`Machine`] runs the whole pipeline on the calling thread. Every callback
//! must be synchronous; an asynchronous one fails with
//! [`MachineError::AsyncCallback`].

use super::core::{delegate_core, Definitions, MachineCore, MachineOptions, Resolved};
use super::event::{Arguments, EventData, Outcome};
use super::model::{ModelId, ModelSlot};
use super::scheduler::{AdmissionMode, PendingTrigger};
use crate::core::{lift, run_sync, State, Transition};
use crate::error::{MachineError, Phase};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A hierarchical state machine driven from synchronous code.
///
/// # Example
///
/// ```rust
/// use canopy::{MachineBuilder, TransitionBuilder};
///
/// struct Door;
///
/// let machine = MachineBuilder::<Door>::new()
///     .states(["closed", "open"])
///     .initial("closed")
///     .transition(TransitionBuilder::new("open").from("closed").to("open"))
///     .build()
///     .unwrap();
///
/// let door = machine.add_model(Door).unwrap();
/// assert!(machine.trigger(door, "open").unwrap().is_executed());
/// assert_eq!(machine.state(door).unwrap(), vec!["open"]);
/// ```
pub struct Machine<M> {
    pub(crate) core: MachineCore<M>,
}

delegate_core!(Machine);

impl<M: Send + Sync + 'static> Machine<M> {
    pub(crate) fn from_definitions(definitions: Definitions<M>) -> Self {
        Self {
            core: MachineCore::new(definitions),
        }
    }

    pub fn options(&self) -> MachineOptions {
        self.core.definitions().options.clone()
    }

    pub fn trigger(&self, model: ModelId, trigger: &str) -> Result<Outcome, MachineError> {
        self.trigger_with(model, trigger, Arguments::new())
    }

    /// Fire `trigger` for one model.
    ///
    /// In queued mode a trigger fired while another one runs for the same
    /// model returns [`Outcome::Scheduled`]; the caller that started the
    /// queue runs it and receives the outcome of its own trigger. If a queued
    /// trigger fails, the remaining queue is dropped and the error returned.
    pub fn trigger_with(
        &self,
        model: ModelId,
        trigger: &str,
        args: Arguments,
    ) -> Result<Outcome, MachineError> {
        let slot = self.core.slot(model)?;
        match self.core.definitions().options.mode {
            AdmissionMode::Immediate => {
                let Some(_running) = slot.admission.try_enter() else {
                    return Err(MachineError::Concurrency {
                        trigger: trigger.to_string(),
                    });
                };
                self.run(&slot, trigger, args)
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
                self.drain(&slot, pending)
            }
        }
    }

    /// Fire `trigger` for every attached model, in attach order.
    ///
    /// Returns `true` when every model executed (or scheduled) a transition.
    pub fn dispatch(&self, trigger: &str) -> Result<bool, MachineError> {
        self.dispatch_with(trigger, Arguments::new())
    }

    pub fn dispatch_with(&self, trigger: &str, args: Arguments) -> Result<bool, MachineError> {
        let mut all = true;
        for slot in self.core.slots() {
            let outcome = self.trigger_with(slot.id, trigger, args.clone())?;
            all &= matches!(outcome, Outcome::Executed | Outcome::Scheduled);
        }
        Ok(all)
    }

    /// Whether `trigger` would pass the conditions of some transition from
    /// the model's active states. Runs `prepare_event`, `prepare` and the
    /// conditions, but never changes state.
    ///
    /// A callback error while checking a candidate goes to `on_exception`
    /// and the next candidate is tried. Without a handler it is returned.
    pub fn may_trigger(&self, model: ModelId, trigger: &str) -> Result<bool, MachineError> {
        self.may_trigger_with(model, trigger, Arguments::new())
    }

    pub fn may_trigger_with(
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
                let checked = run_sync(&definitions.hooks.prepare_event, &event, Phase::PrepareEvent)
                    .and_then(|()| run_sync(&transition.prepare, &event, Phase::Prepare))
                    .and_then(|()| conditions_hold(&transition, &event));
                match checked {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(err) => {
                        self.handle_error(&mut event, err)?;
                    }
                }
            }
        }
        Ok(false)
    }

    fn drain(
        &self,
        slot: &Arc<ModelSlot<M>>,
        first: PendingTrigger,
    ) -> Result<Outcome, MachineError> {
        let mut queue = slot.admission.draining();
        let mut outcome = None;
        let mut next = Some(first);
        while let Some(pending) = next {
            let result = self.run(slot, &pending.trigger, pending.args)?;
            outcome.get_or_insert(result);
            next = queue.advance();
        }
        Ok(outcome.unwrap_or(Outcome::NotExecuted))
    }

    fn run(
        &self,
        slot: &Arc<ModelSlot<M>>,
        trigger: &str,
        args: Arguments,
    ) -> Result<Outcome, MachineError> {
        let definitions = self.core.definitions();
        let mut event = EventData::new(Arc::clone(slot), definitions, trigger, args, None);
        debug!(
            machine = %event.machine_name(),
            model = %slot.id,
            trigger,
            "processing trigger"
        );

        let outcome = match self.process(&mut event) {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.handle_error(&mut event, err),
        };
        self.finalize(&event);
        outcome
    }

    fn handle_error(
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
        match run_sync(&definitions.hooks.on_exception, event, Phase::Exception) {
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

    fn finalize(&self, event: &EventData<M>) {
        let definitions = Arc::clone(&event.definitions);
        if let Err(err) = run_sync(&definitions.hooks.finalize_event, event, Phase::Finalize) {
            warn!(
                machine = %event.machine_name(),
                trigger = %event.trigger,
                error = %err,
                "finalize_event callback failed"
            );
        }
    }

    fn process(&self, event: &mut EventData<M>) -> Result<Outcome, MachineError> {
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
            run_sync(&definitions.hooks.prepare_event, event, Phase::PrepareEvent)?;
            if self.attempt(event, &source)? {
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

    /// Try each candidate from `source` until one executes.
    fn attempt(&self, event: &mut EventData<M>, source: &str) -> Result<bool, MachineError> {
        let candidates = event.definitions.events.candidates(&event.trigger, source);
        for transition in candidates {
            event.transition = Some(Arc::clone(&transition));
            if self.execute(event, &transition, source)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execute(
        &self,
        event: &mut EventData<M>,
        transition: &Transition<M>,
        source: &str,
    ) -> Result<bool, MachineError> {
        let definitions = Arc::clone(&event.definitions);
        debug!(
            machine = %event.machine_name(),
            trigger = %event.trigger,
            source,
            target = ?transition.target,
            "initiating transition"
        );

        run_sync(&transition.prepare, event, Phase::Prepare)?;
        if !conditions_hold(transition, event)? {
            debug!(
                machine = %event.machine_name(),
                trigger = %event.trigger,
                source,
                "transition conditions not met"
            );
            return Ok(false);
        }

        run_sync(&definitions.hooks.before_state_change, event, Phase::BeforeStateChange)?;
        run_sync(&transition.before, event, Phase::Before)?;
        if let Some(dest) = transition.destination(source) {
            self.change_state(event, &dest)?;
        }
        event.result = true;
        run_sync(&transition.after, event, Phase::After)?;
        run_sync(&definitions.hooks.after_state_change, event, Phase::AfterStateChange)?;
        Ok(true)
    }

    fn change_state(&self, event: &mut EventData<M>, dest: &str) -> Result<(), MachineError> {
        let definitions = Arc::clone(&event.definitions);
        let plan = MachineCore::plan(&definitions, &event.slot, dest)?;

        for name in &plan.exit {
            let state = definitions.state(name)?;
            event.scope = Some(Arc::clone(&state));
            let exited = exit_state(&state, event);
            state.pocket.clear();
            exited?;
        }

        event
            .slot
            .commit_tree(plan.tree.clone(), &event.trigger, definitions.states.separator());

        for name in &plan.enter {
            let state = definitions.state(name)?;
            event.scope = Some(Arc::clone(&state));
            enter_state(&state, event)?;
        }
        event.scope = None;

        if definitions.reached_final(&plan) {
            run_sync(&definitions.hooks.on_final, event, Phase::Final)?;
        }
        Ok(())
    }
}

/// A callback failure inside a condition rejects the candidate. Other errors,
/// such as an unresolved name, abort the trigger.
pub(crate) fn conditions_hold<M: 'static>(
    transition: &Transition<M>,
    event: &EventData<M>,
) -> Result<bool, MachineError> {
    for condition in &transition.conditions {
        match condition.check_sync(event) {
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

fn exit_state<M: 'static>(state: &State<M>, event: &EventData<M>) -> Result<(), MachineError> {
    for aspect in &state.aspects {
        aspect
            .on_exit(state, event)
            .map_err(|err| lift(Phase::Exit, err))?;
    }
    run_sync(&state.on_exit, event, Phase::Exit)?;
    if let Some(hook) = event.model_hook(&format!("on_exit_{}", state.name)) {
        hook.call_sync(event, Phase::Exit)?;
    }
    debug!(machine = %event.machine_name(), state = %state.name, "exited state");
    Ok(())
}

fn enter_state<M: 'static>(state: &State<M>, event: &EventData<M>) -> Result<(), MachineError> {
    for aspect in &state.aspects {
        aspect
            .on_enter(state, event)
            .map_err(|err| lift(Phase::Enter, err))?;
    }
    run_sync(&state.on_enter, event, Phase::Enter)?;
    if let Some(hook) = event.model_hook(&format!("on_enter_{}", state.name)) {
        hook.call_sync(event, Phase::Enter)?;
    }
    debug!(machine = %event.machine_name(), state = %state.name, "entered state");
    Ok(())
}
