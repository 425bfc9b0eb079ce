//! Integration tests for the blocking machine.

use canopy::core::State;
use canopy::{
    Attach, Callback, CallbackResult, Condition, EventData, MachineBuilder, MachineError,
    Outcome, Phase, Predicate, StateAspect, StateBuilder, TransitionBuilder,
};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
    ready: AtomicBool,
}

impl Recorder {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

fn note(entry: &'static str) -> Callback<Recorder> {
    Callback::new(move |event: &EventData<Recorder>| {
        event.model().push(entry);
        Ok(())
    })
}

struct Trace;

impl StateAspect<Recorder> for Trace {
    fn on_enter(&self, state: &State<Recorder>, event: &EventData<Recorder>) -> CallbackResult {
        event.model().push(format!("enter {}", state.name()));
        Ok(())
    }

    fn on_exit(&self, state: &State<Recorder>, event: &EventData<Recorder>) -> CallbackResult {
        event.model().push(format!("exit {}", state.name()));
        Ok(())
    }
}

fn traced(name: &str) -> StateBuilder<Recorder> {
    StateBuilder::new(name).aspect(Trace)
}

#[test]
fn pipeline_runs_phases_in_order() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(
            StateBuilder::new("A")
                .child(StateBuilder::new("1").on_exit(note("exit A_1")))
                .initial("1")
                .on_exit(note("exit A")),
        )
        .state(
            StateBuilder::new("B")
                .on_enter(note("enter B"))
                .child(StateBuilder::new("x").on_enter(note("enter B_x")))
                .initial("x"),
        )
        .initial("A")
        .prepare_event(note("prepare_event"))
        .before_state_change(note("before_state_change"))
        .after_state_change(note("after_state_change"))
        .finalize_event(note("finalize_event"))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .prepare(note("prepare"))
                .when(|event| {
                    event.model().push("condition");
                    true
                })
                .before(note("before"))
                .after(note("after")),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();
    assert_eq!(machine.state(model).unwrap(), vec!["A_1"]);

    let outcome = machine.trigger(model, "go").unwrap();

    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(machine.state(model).unwrap(), vec!["B_x"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec![
            "prepare_event",
            "prepare",
            "condition",
            "before_state_change",
            "before",
            "exit A_1",
            "exit A",
            "enter B",
            "enter B_x",
            "after",
            "after_state_change",
            "finalize_event",
        ]
    );
}

#[test]
fn rejected_conditions_leave_state_unchanged() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .finalize_event(Callback::new(|event: &EventData<Recorder>| {
            event.model().push(format!("result {}", event.result()));
            Ok(())
        }))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .when(|event: &EventData<Recorder>| event.model().ready.load(Ordering::SeqCst)),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert_eq!(machine.trigger(model, "go").unwrap(), Outcome::NotExecuted);
    assert_eq!(machine.state(model).unwrap(), vec!["A"]);

    machine.model(model).unwrap().ready.store(true, Ordering::SeqCst);
    assert_eq!(machine.trigger(model, "go").unwrap(), Outcome::Executed);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["result false", "result true"]
    );
}

#[test]
fn pocket_is_visible_to_substates_and_cleared_on_exit() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(
            StateBuilder::new("job")
                .on_enter(Callback::new(|event| {
                    if let Some(pocket) = event.pocket() {
                        pocket.set(42u32);
                    }
                    Ok(())
                }))
                .child(StateBuilder::new("run").on_enter(Callback::new(|event: &EventData<Recorder>| {
                    let value = event
                        .get_state("job")
                        .and_then(|job| job.pocket().get::<u32>())
                        .map(|value| *value);
                    event.model().push(format!("pocket {value:?}"));
                    Ok(())
                })))
                .initial("run"),
        )
        .state(StateBuilder::new("idle"))
        .initial("idle")
        .transition(TransitionBuilder::new("start").from("idle").to("job"))
        .transition(TransitionBuilder::new("stop").from("job").to("idle"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(model, "start").unwrap();
    assert_eq!(machine.model(model).unwrap().take(), vec!["pocket Some(42)"]);
    assert!(!machine.get_state("job").unwrap().pocket().is_empty());

    machine.trigger(model, "stop").unwrap();
    assert!(machine.get_state("job").unwrap().pocket().is_empty());
}

#[test]
fn pocket_values_follow_the_state_across_hops() {
    let shared = Arc::new(vec![1, 2, 3]);
    let kept = Arc::clone(&shared);
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A"))
        .state(StateBuilder::new("B").on_enter(Callback::new(|event| {
            if let Some(pocket) = event.pocket() {
                pocket.set(String::from("draft"));
            }
            Ok(())
        })))
        .state(StateBuilder::new("C").on_enter(Callback::new(move |event| {
            if let Some(pocket) = event.pocket() {
                pocket.set_shared(Arc::clone(&kept));
            }
            Ok(())
        })))
        .initial("A")
        .transition(TransitionBuilder::new("go").from("A").to("B"))
        .transition(
            TransitionBuilder::new("go")
                .from("B")
                .to("C")
                .before(Callback::new(|event: &EventData<Recorder>| {
                    let draft = event
                        .get_state("B")
                        .and_then(|state| state.pocket().get::<String>());
                    event.model().push(format!("B holds {draft:?}"));
                    Ok(())
                })),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(model, "go").unwrap();
    machine.trigger(model, "go").unwrap();

    assert_eq!(machine.state(model).unwrap(), vec!["C"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec![r#"B holds Some("draft")"#]
    );
    assert!(machine.get_state("B").unwrap().pocket().is_empty());
    let stored = machine.get_state("C").unwrap().pocket().get::<Vec<i32>>().unwrap();
    assert!(Arc::ptr_eq(&stored, &shared));
}

#[test]
fn pocket_holds_mappings_set_by_callbacks() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A"))
        .state(StateBuilder::new("B").on_enter(Callback::new(|event| {
            if let Some(pocket) = event.pocket() {
                pocket.set(HashMap::from([("attempts", 1u32), ("limit", 3)]));
            }
            Ok(())
        })))
        .initial("A")
        .transition(TransitionBuilder::new("go").from("A").to("B"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(model, "go").unwrap();

    let stored = machine
        .get_state("B")
        .unwrap()
        .pocket()
        .get::<HashMap<&str, u32>>()
        .unwrap();
    assert_eq!(stored.get("limit"), Some(&3));
    assert_eq!(stored.len(), 2);
}

#[test]
fn internal_transition_keeps_pocket() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A"))
        .initial("A")
        .transition(TransitionBuilder::new("poke").from("A").internal())
        .transition(TransitionBuilder::new("again").from("A").reflexive())
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();
    let state = machine.get_state("A").unwrap();
    state.pocket().set(7u32);

    assert_eq!(machine.trigger(model, "poke").unwrap(), Outcome::Executed);
    assert_eq!(state.pocket().get::<u32>().as_deref(), Some(&7));

    machine.trigger(model, "again").unwrap();
    assert!(state.pocket().is_empty());
}

fn parallel_machine() -> canopy::Machine<Recorder> {
    MachineBuilder::new()
        .state(
            traced("C")
                .parallel()
                .child(traced("1").child(traced("a")).child(traced("b")).initial("a"))
                .child(traced("2").child(traced("a")).child(traced("b")).initial("a")),
        )
        .state(traced("D"))
        .initial("D")
        .transition(TransitionBuilder::new("enter").from("D").to("C"))
        .transition(TransitionBuilder::new("step").from("C_1_a").to("C_1_b"))
        .transition(TransitionBuilder::new("reset").from("C_1_b").to("C_1_a"))
        .transition(TransitionBuilder::new("reset").from("C_2_a").to("C_2_b"))
        .transition(TransitionBuilder::new("leave").from("C").to("D"))
        .build()
        .unwrap()
}

#[test]
fn parallel_state_enters_every_region() {
    let machine = parallel_machine();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(model, "enter").unwrap();

    assert_eq!(machine.state(model).unwrap(), vec!["C_1_a", "C_2_a"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["exit D", "enter C", "enter C_1", "enter C_2", "enter C_1_a", "enter C_2_a"]
    );
}

#[test]
fn region_transition_leaves_siblings_untouched() {
    let machine = parallel_machine();
    let model = machine.add_model(Recorder::default()).unwrap();
    machine.trigger(model, "enter").unwrap();
    machine.model(model).unwrap().take();

    machine.trigger(model, "step").unwrap();

    assert_eq!(machine.state(model).unwrap(), vec!["C_1_b", "C_2_a"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["exit C_1_a", "enter C_1_b"]
    );
}

#[test]
fn one_trigger_moves_every_matching_region() {
    let machine = parallel_machine();
    let model = machine.add_model(Recorder::default()).unwrap();
    machine.trigger(model, "enter").unwrap();
    machine.trigger(model, "step").unwrap();

    machine.trigger(model, "reset").unwrap();

    assert_eq!(machine.state(model).unwrap(), vec!["C_1_a", "C_2_b"]);
}

#[test]
fn leaving_parallel_state_exits_leaves_first() {
    let machine = parallel_machine();
    let model = machine.add_model(Recorder::default()).unwrap();
    machine.trigger(model, "enter").unwrap();
    machine.trigger(model, "step").unwrap();
    machine.model(model).unwrap().take();

    machine.trigger(model, "leave").unwrap();

    assert_eq!(machine.state(model).unwrap(), vec!["D"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["exit C_1_b", "exit C_2_a", "exit C_1", "exit C_2", "exit C", "enter D"]
    );
}

#[test]
fn region_pocket_survives_sibling_transition() {
    let machine = parallel_machine();
    let model = machine.add_model(Recorder::default()).unwrap();
    machine.trigger(model, "enter").unwrap();
    for name in ["C", "C_1_a", "C_2_a"] {
        machine.get_state(name).unwrap().pocket().set(name.to_string());
    }

    machine.trigger(model, "step").unwrap();

    assert!(machine.get_state("C_1_a").unwrap().pocket().is_empty());
    let sibling = machine.get_state("C_2_a").unwrap().pocket().get::<String>();
    assert_eq!(sibling.as_deref().map(String::as_str), Some("C_2_a"));
    assert!(!machine.get_state("C").unwrap().pocket().is_empty());

    machine.trigger(model, "leave").unwrap();

    assert!(machine.get_state("C_2_a").unwrap().pocket().is_empty());
    assert!(machine.get_state("C").unwrap().pocket().is_empty());
}

#[test]
fn queued_trigger_runs_after_current_one_returns() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B", "C"])
        .initial("A")
        .queued(true)
        .finalize_event(note("finalize"))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .after(Callback::new(|event: &EventData<Recorder>| {
                    let outcome = event.fire("next")?;
                    event.model().push(format!("{outcome:?}"));
                    Ok(())
                })),
        )
        .transition(TransitionBuilder::new("next").from("B").to("C").before(note("next")))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let outcome = machine.trigger(model, "go").unwrap();

    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(machine.state(model).unwrap(), vec!["C"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["Scheduled", "finalize", "next", "finalize"]
    );
    assert_eq!(machine.pending(model).unwrap(), 0);
}

#[test]
fn failing_queued_trigger_drops_the_rest() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B", "C"])
        .initial("A")
        .queued(true)
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .after(Callback::new(|event| {
                    event.fire("bogus")?;
                    event.fire("next")?;
                    Ok(())
                })),
        )
        .transition(TransitionBuilder::new("next").from("B").to("C"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let result = machine.trigger(model, "go");

    assert!(matches!(result, Err(MachineError::UnknownTrigger { .. })));
    assert_eq!(machine.state(model).unwrap(), vec!["B"]);
    assert_eq!(machine.pending(model).unwrap(), 0);
}

#[test]
fn panicking_queued_trigger_releases_the_queue() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B", "C"])
        .initial("A")
        .queued(true)
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .before(Callback::new(|event| {
                    event.fire("skip")?;
                    panic!("callback blew up");
                })),
        )
        .transition(TransitionBuilder::new("skip").from("A").to("C"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| machine.trigger(model, "go")));
    assert!(result.is_err());
    assert_eq!(machine.pending(model).unwrap(), 0);

    assert_eq!(machine.trigger(model, "skip").unwrap(), Outcome::Executed);
    assert_eq!(machine.state(model).unwrap(), vec!["C"]);
}

#[test]
fn invalid_triggers_are_reported() {
    let machine = MachineBuilder::<Recorder>::new()
        .name("door")
        .states(["A", "B"])
        .initial("A")
        .transition(TransitionBuilder::new("back").from("B").to("A"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let invalid = machine.trigger(model, "back").unwrap_err();
    let unknown = machine.trigger(model, "bogus").unwrap_err();

    assert_eq!(
        invalid.to_string(),
        "door: Can't trigger event 'back' from state(s) [\"A\"]"
    );
    assert!(matches!(unknown, MachineError::UnknownTrigger { trigger, .. } if trigger == "bogus"));
}

#[test]
fn ignore_invalid_triggers_machine_and_state_level() {
    let lenient = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .ignore_invalid_triggers(true)
        .transition(TransitionBuilder::new("back").from("B").to("A"))
        .build()
        .unwrap();
    let model = lenient.add_model(Recorder::default()).unwrap();
    assert_eq!(lenient.trigger(model, "back").unwrap(), Outcome::NotExecuted);
    assert_eq!(lenient.trigger(model, "bogus").unwrap(), Outcome::NotExecuted);

    let strict = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A").ignore_invalid_triggers(true))
        .state(StateBuilder::new("B"))
        .initial("A")
        .transition(TransitionBuilder::new("back").from("B").to("A"))
        .build()
        .unwrap();
    let model = strict.add_model(Recorder::default()).unwrap();
    assert_eq!(strict.trigger(model, "back").unwrap(), Outcome::NotExecuted);

    strict.trigger(model, "to_B").unwrap();
    assert!(strict.trigger(model, "bogus").is_err());
}

#[test]
fn on_exception_absorbs_errors_and_finalize_sees_them() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .on_exception(Callback::new(|event: &EventData<Recorder>| {
            let error = event.error().map(ToString::to_string).unwrap_or_default();
            event.model().push(format!("handled {error}"));
            Ok(())
        }))
        .finalize_event(Callback::new(|event: &EventData<Recorder>| {
            event.model().push(format!("finalize error={}", event.error().is_some()));
            Ok(())
        }))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .before(Callback::new(|_| Err("boom".into()))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let outcome = machine.trigger(model, "go").unwrap();

    assert_eq!(outcome, Outcome::NotExecuted);
    assert_eq!(machine.state(model).unwrap(), vec!["A"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["handled before callback failed: boom", "finalize error=true"]
    );
}

#[test]
fn errors_propagate_without_handler_and_finalize_still_runs() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .finalize_event(note("finalize"))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .after(Callback::new(|_| Err("late".into()))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let result = machine.trigger(model, "go");

    assert!(matches!(
        result,
        Err(MachineError::Callback {
            phase: Phase::After,
            ..
        })
    ));
    assert_eq!(machine.state(model).unwrap(), vec!["B"]);
    assert_eq!(machine.model(model).unwrap().take(), vec!["finalize"]);
}

#[test]
fn finalize_failures_do_not_change_the_outcome() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .finalize_event(Callback::new(|_| Err("ignored".into())))
        .transition(TransitionBuilder::new("go").from("A").to("B"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert_eq!(machine.trigger(model, "go").unwrap(), Outcome::Executed);
}

#[test]
fn failing_exception_handler_returns_original_error() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .on_exception(Callback::new(|_| Err("handler broke".into())))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .prepare(Callback::new(|_| Err("original".into()))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let err = machine.trigger(model, "go").unwrap_err();

    assert_eq!(err.to_string(), "prepare callback failed: original");
}

#[test]
fn invalid_trigger_is_routed_to_on_exception() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A"])
        .initial("A")
        .on_exception(note("handled"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert_eq!(machine.trigger(model, "bogus").unwrap(), Outcome::NotExecuted);
    assert_eq!(machine.model(model).unwrap().take(), vec!["handled"]);
}

#[test]
fn may_trigger_checks_conditions_without_moving() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .when(|event: &EventData<Recorder>| event.model().ready.load(Ordering::SeqCst))
                .before(note("before")),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert!(!machine.may_trigger(model, "go").unwrap());
    machine.model(model).unwrap().ready.store(true, Ordering::SeqCst);
    assert!(machine.may_trigger(model, "go").unwrap());
    assert!(!machine.may_trigger(model, "bogus").unwrap());

    assert_eq!(machine.state(model).unwrap(), vec!["A"]);
    assert!(machine.model(model).unwrap().take().is_empty());
}

#[test]
fn may_trigger_routes_check_errors_to_on_exception() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B", "C"])
        .initial("A")
        .on_exception(Callback::new(|event: &EventData<Recorder>| {
            let error = event.error().map(ToString::to_string).unwrap_or_default();
            event.model().push(format!("handled {error}"));
            Ok(())
        }))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .prepare(Callback::new(|_| Err("not ready".into()))),
        )
        .transition(TransitionBuilder::new("go").from("A").to("C"))
        .transition(
            TransitionBuilder::new("stuck")
                .from("A")
                .to("B")
                .prepare(Callback::new(|_| Err("jammed".into()))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert!(machine.may_trigger(model, "go").unwrap());
    assert!(!machine.may_trigger(model, "stuck").unwrap());

    assert_eq!(machine.state(model).unwrap(), vec!["A"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec![
            "handled prepare callback failed: not ready",
            "handled prepare callback failed: jammed"
        ]
    );
}

#[test]
fn may_trigger_returns_check_errors_without_handler() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .prepare(Callback::new(|_| Err("not ready".into()))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert!(matches!(
        machine.may_trigger(model, "go"),
        Err(MachineError::Callback {
            phase: Phase::Prepare,
            ..
        })
    ));
}

#[test]
fn internal_and_reflexive_transitions() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(traced("A"))
        .initial("A")
        .transition(TransitionBuilder::new("poke").from("A").internal().after(note("poked")))
        .transition(TransitionBuilder::new("again").from("A").reflexive())
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(model, "poke").unwrap();
    assert_eq!(machine.model(model).unwrap().take(), vec!["poked"]);

    machine.trigger(model, "again").unwrap();
    assert_eq!(machine.model(model).unwrap().take(), vec!["exit A", "enter A"]);
}

#[test]
fn named_callbacks_resolve_on_model_then_machine() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .callback("audit", note("machine audit"))
        .predicate("ready", Predicate::new(|_| true))
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .condition(Condition::when("ready"))
                .before("audit")
                .after("audit"),
        )
        .build()
        .unwrap();
    let model = machine
        .attach(
            Attach::new(Recorder::default())
                .callback("on_enter_B", note("model entered B"))
                .callback("on_exit_A", note("model left A")),
        )
        .unwrap();
    let other = machine
        .attach(Attach::new(Recorder::default()).callback("audit", note("model audit")))
        .unwrap();

    machine.trigger(model, "go").unwrap();
    machine.trigger(other, "go").unwrap();

    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["machine audit", "model left A", "model entered B", "machine audit"]
    );
    assert_eq!(
        machine.model(other).unwrap().take(),
        vec!["model audit", "model audit"]
    );
}

#[test]
fn unresolved_callback_name_is_an_error() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .transition(TransitionBuilder::new("go").from("A").to("B").after("missing"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let result = machine.trigger(model, "go");

    assert!(matches!(result, Err(MachineError::CallbackNotFound(name)) if name == "missing"));
}

#[test]
fn async_callbacks_are_rejected_by_blocking_machine() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .transition(
            TransitionBuilder::new("go")
                .from("A")
                .to("B")
                .before(Callback::future(|_| Box::pin(async { Ok(()) }))),
        )
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    let result = machine.trigger(model, "go");

    assert!(matches!(
        result,
        Err(MachineError::AsyncCallback {
            phase: Phase::Before
        })
    ));
}

#[test]
fn final_state_runs_on_final() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A"))
        .state(
            StateBuilder::new("done")
                .children(["ok"])
                .initial("ok"),
        )
        .state(StateBuilder::new("end").final_state())
        .initial("A")
        .on_final(note("final"))
        .transition(TransitionBuilder::new("finish").from("A").to("end"))
        .transition(TransitionBuilder::new("wrap").from("A").to("done"))
        .build()
        .unwrap();
    let first = machine.add_model(Recorder::default()).unwrap();
    let second = machine.add_model(Recorder::default()).unwrap();

    machine.trigger(first, "finish").unwrap();
    machine.trigger(second, "wrap").unwrap();

    assert_eq!(machine.model(first).unwrap().take(), vec!["final"]);
    assert!(machine.model(second).unwrap().take().is_empty());
}

#[test]
fn runtime_additions_are_visible_to_later_triggers() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A").children(["1"]).initial("1"))
        .initial("A")
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    machine
        .add_state(traced("B").children(["x", "y"]).initial("x"))
        .unwrap();
    machine
        .add_transition(TransitionBuilder::new("hop").from("A_1").to("B_y"))
        .unwrap();
    machine.on_enter("B_y", note("entered B_y")).unwrap();

    machine.trigger(model, "hop").unwrap();
    assert_eq!(machine.state(model).unwrap(), vec!["B_y"]);
    assert_eq!(
        machine.model(model).unwrap().take(),
        vec!["enter B", "entered B_y"]
    );

    machine.trigger(model, "to_A_1").unwrap();
    assert_eq!(machine.state(model).unwrap(), vec!["A_1"]);

    let invalid = machine.add_transition(TransitionBuilder::new("jump").from("B").to("Z"));
    assert!(matches!(invalid, Err(MachineError::Configuration(_))));
}

#[test]
fn dispatch_fires_for_every_model() {
    let machine = MachineBuilder::<Recorder>::new()
        .states(["A", "B"])
        .initial("A")
        .transition(TransitionBuilder::new("go").from("A").to("B"))
        .build()
        .unwrap();
    let first = machine.add_model(Recorder::default()).unwrap();
    let second = machine
        .attach(Attach::new(Recorder::default()).initial("B"))
        .unwrap();

    assert!(machine.dispatch("go").is_err());

    machine.set_state(first, &["A"]).unwrap();
    machine.set_state(second, &["A"]).unwrap();
    assert!(machine.dispatch("go").unwrap());
    assert_eq!(machine.state(first).unwrap(), vec!["B"]);
    assert_eq!(machine.state(second).unwrap(), vec!["B"]);
}

#[test]
fn state_queries_and_model_lifecycle() {
    let machine = MachineBuilder::<Recorder>::new()
        .state(StateBuilder::new("A").children(["1", "2"]).initial("1"))
        .state(StateBuilder::new("B"))
        .initial("A")
        .history_limit(4)
        .transition(TransitionBuilder::new("next").from("A_1").to("A_2"))
        .transition(TransitionBuilder::new("out").from("A").to("B"))
        .build()
        .unwrap();
    let model = machine.add_model(Recorder::default()).unwrap();

    assert!(machine.is_state(model, "A_1", false).unwrap());
    assert!(machine.is_state(model, "A", true).unwrap());
    assert!(!machine.is_state(model, "A", false).unwrap());

    let triggers = machine.triggers_for(model).unwrap();
    assert!(triggers.contains(&"next".to_string()));
    assert!(triggers.contains(&"out".to_string()));

    machine.trigger(model, "next").unwrap();
    machine.trigger(model, "out").unwrap();
    let history = machine.history(model).unwrap();
    let path: Vec<Vec<String>> = history.get_path().iter().map(|s| s.to_vec()).collect();
    assert_eq!(path, vec![vec!["A_1"], vec!["A_2"], vec!["B"]]);

    assert!(machine.remove_model(model));
    assert!(matches!(
        machine.trigger(model, "out"),
        Err(MachineError::UnknownModel(id)) if id == model
    ));
}
