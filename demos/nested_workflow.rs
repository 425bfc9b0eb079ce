//! Nested Order Workflow
//!
//! This example loads an order workflow from JSON and drives it through
//! nested and parallel states.
//!
//! Key concepts:
//! - Declarative machine definition with named callbacks
//! - Composite states entering their initial child
//! - Parallel regions (payment and shipping) progressing independently
//! - Pocket storage scoped to a state
//!
//! Run with: RUST_LOG=canopy=debug cargo run --example nested_workflow

use canopy::{Attach, Callback, EventData, MachineBuilder, MachineConfig, Predicate};
use std::sync::atomic::{AtomicU32, Ordering};

const ORDER: &str = r#"{
    "name": "order",
    "initial": "cart",
    "states": [
        "cart",
        {
            "name": "fulfilment",
            "parallel": true,
            "on_enter": "open_ticket",
            "children": [
                {"name": "payment", "children": ["pending", "captured"], "initial": "pending"},
                {"name": "shipping", "children": ["packing", "sent"], "initial": "packing"}
            ]
        },
        {"name": "done", "final": true}
    ],
    "transitions": [
        {"trigger": "checkout", "source": "cart", "dest": "fulfilment", "conditions": "has_items"},
        ["capture", "fulfilment_payment_pending", "fulfilment_payment_captured"],
        ["ship", "fulfilment_shipping_packing", "fulfilment_shipping_sent"],
        {"trigger": "close", "source": "fulfilment", "dest": "done", "before": "close_ticket"}
    ],
    "on_final": "archive"
}"#;

struct Order {
    items: AtomicU32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Nested Order Workflow ===\n");

    let config = MachineConfig::from_json(ORDER).expect("valid order definition");
    let machine = MachineBuilder::<Order>::from_config(config)
        .predicate(
            "has_items",
            Predicate::new(|event: &EventData<Order>| event.model().items.load(Ordering::SeqCst) > 0),
        )
        .callback(
            "open_ticket",
            Callback::new(|event| {
                if let Some(pocket) = event.pocket() {
                    pocket.set(format!("ticket-{}", event.model_id()));
                }
                Ok(())
            }),
        )
        .callback(
            "close_ticket",
            Callback::new(|event| {
                let ticket = event
                    .get_state("fulfilment")
                    .and_then(|state| state.pocket().get::<String>());
                println!("  [Ticket] closing {:?}", ticket.as_deref());
                Ok(())
            }),
        )
        .callback(
            "archive",
            Callback::new(|_| {
                println!("  [Archive] order reached a final state");
                Ok(())
            }),
        )
        .build()
        .expect("order machine builds");

    let order = machine
        .attach(Attach::new(Order {
            items: AtomicU32::new(0),
        }))
        .expect("model attaches");

    println!("Step 1: Checkout with an empty cart");
    let outcome = machine.trigger(order, "checkout").expect("checkout runs");
    println!("  outcome: {outcome:?}, state: {:?}\n", machine.state(order).unwrap());

    println!("Step 2: Add items and checkout again");
    if let Some(model) = machine.model(order) {
        model.items.store(3, Ordering::SeqCst);
    }
    machine.trigger(order, "checkout").expect("checkout runs");
    println!("  state: {:?}\n", machine.state(order).unwrap());

    println!("Step 3: Capture payment, then ship");
    machine.trigger(order, "capture").expect("capture runs");
    println!("  state: {:?}", machine.state(order).unwrap());
    machine.trigger(order, "ship").expect("ship runs");
    println!("  state: {:?}\n", machine.state(order).unwrap());

    println!("Step 4: Close the order");
    machine.trigger(order, "close").expect("close runs");
    println!("  state: {:?}", machine.state(order).unwrap());
    println!(
        "  ticket cleared: {}\n",
        machine
            .get_state("fulfilment")
            .map(|state| state.pocket().is_empty())
            .unwrap_or(true)
    );

    println!("Key Takeaways:");
    println!("- Named callbacks bind behavior to a JSON definition");
    println!("- Parallel regions move independently of each other");
    println!("- A state's pocket lives exactly as long as the state is active");

    println!("\n=== Example Complete ===");
}
