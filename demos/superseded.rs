//! Superseded Transitions
//!
//! This example races two triggers on the same model with an
//! [`AsyncMachine`](canopy::AsyncMachine).
//!
//! Key concepts:
//! - Every trigger runs as a cancellable unit of work
//! - The first transition to pass its conditions cancels the others
//! - Cancelled triggers report `Outcome::Superseded`
//! - Hosts can cancel running transitions explicitly
//!
//! Run with: RUST_LOG=canopy=debug cargo run --example superseded

use canopy::{Callback, Condition, MachineBuilder, Predicate, TransitionBuilder};
use std::time::Duration;
use tokio::time::sleep;

struct Lamp;

fn delayed(millis: u64) -> Condition<Lamp> {
    Condition::when(Predicate::future(move |_| {
        Box::pin(async move {
            sleep(Duration::from_millis(millis)).await;
            Ok(true)
        })
    }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Superseded Transitions ===\n");

    let machine = MachineBuilder::<Lamp>::new()
        .name("lamp")
        .states(["off", "dimmed", "bright"])
        .initial("off")
        .finalize_event(Callback::new(|event| {
            println!(
                "  [Finalize] {} executed={} error={:?}",
                event.trigger(),
                event.result(),
                event.error().map(ToString::to_string)
            );
            Ok(())
        }))
        .transition(TransitionBuilder::new("dim").from("off").to("dimmed").condition(delayed(100)))
        .transition(TransitionBuilder::new("brighten").from("off").to("bright").condition(delayed(10)))
        .build_async()
        .expect("lamp machine builds");
    let lamp = machine.add_model(Lamp).expect("model attaches");

    println!("Race: slow 'dim' against fast 'brighten'");
    let (dim, brighten) = tokio::join!(machine.trigger(lamp, "dim"), machine.trigger(lamp, "brighten"));
    println!("  dim: {dim:?}");
    println!("  brighten: {brighten:?}");
    println!("  state: {:?}\n", machine.state(lamp).unwrap());

    println!("External cancellation of a pending transition");
    machine.set_state(lamp, &["off"]).expect("reset");
    let (dim, cancelled) = tokio::join!(machine.trigger(lamp, "dim"), async {
        sleep(Duration::from_millis(20)).await;
        machine.cancel_running_transitions(lamp)
    });
    println!("  cancelled units: {cancelled}");
    println!("  dim: {dim:?}");
    println!("  state: {:?}\n", machine.state(lamp).unwrap());

    println!("Key Takeaways:");
    println!("- The transition that commits first wins");
    println!("- Superseded triggers finish quietly, external cancellation is an error");

    println!("\n=== Example Complete ===");
}
