use std::sync::{Arc, Mutex};
use std::time::Duration;

use formgrid::layout::compute_layout;
use formgrid::prelude::*;
use futures::executor::block_on;
use serde_json::json;

fn grid(columns: usize) -> LayoutOptions {
    LayoutOptions::new()
        .fixed_columns(columns)
        .gap(12.0)
        .container_padding(8.0)
}

fn spans(spans: &[(&str, usize)]) -> Vec<FormItemDescriptor> {
    spans
        .iter()
        .map(|(key, span)| FormItemDescriptor::input(*key).span(*span))
        .collect()
}

fn placement(result: &LayoutResult, key: &str) -> (usize, usize) {
    let position = result.positions.get(key).expect("placed");
    (position.row, position.column)
}

#[test]
fn grid_packing_is_deterministic() {
    let items = spans(&[("a", 1), ("b", 3), ("c", 2), ("d", 1), ("e", 1), ("f", 4)]);
    for width in [320.0, 777.0, 1440.0] {
        let options = LayoutOptions::new().breakpoints(Breakpoint::standard());
        let first = compute_layout(&items, width, &options, false);
        let second = compute_layout(&items, width, &options, false);
        assert_eq!(first, second, "width {width}");
    }
}

#[test]
fn oversized_spans_clamp_to_a_full_row() {
    let items = spans(&[("lead", 1), ("huge", 12)]);
    for columns in 1..=5 {
        let result = compute_layout(&items, 900.0, &grid(columns), false);
        let huge = &result.positions["huge"];
        assert_eq!(huge.span, columns);
        assert_eq!(huge.column, 0);
    }
}

#[test]
fn rows_advance_when_remaining_width_is_short() {
    let items = spans(&[("A", 2), ("B", 1), ("C", 1), ("D", 3)]);
    let result = compute_layout(&items, 900.0, &grid(3), false);
    assert_eq!(placement(&result, "A"), (0, 0));
    assert_eq!(placement(&result, "B"), (0, 2));
    assert_eq!(placement(&result, "C"), (1, 0));
    assert_eq!(placement(&result, "D"), (2, 0));
}

#[test]
fn collapse_then_expand_restores_the_visible_set() {
    let mut calculator = LayoutCalculator::new(grid(2).default_rows(1));
    calculator.update_container_size(600.0, None);
    calculator.update_items(spans(&[("a", 1), ("b", 1), ("c", 2), ("d", 1)]));
    let before = calculator.result().visible_keys();

    calculator.set_collapsed(true);
    assert_eq!(
        calculator.result().visible_keys(),
        vec![FieldKey::from("a"), FieldKey::from("b")]
    );
    calculator.set_collapsed(false);
    assert_eq!(calculator.result().visible_keys(), before);
}

fn signup_form(delay_ms: u64) -> FormStateManager {
    FormStateManager::new(
        vec![
            FormItemDescriptor::input("username")
                .label("Username")
                .required(true)
                .rule(ValidationRule::min_length(3)),
            FormItemDescriptor::input("email").rule(ValidationRule::email()),
            FormItemDescriptor::new("terms", FieldType::Checkbox),
        ],
        FormStateOptions::new().validation_delay(Duration::from_millis(delay_ms)),
    )
}

#[test]
fn validation_round_trip_clears_after_debounce() {
    let form = signup_form(15);

    form.set_value("username", "", SetValueOptions::default())
        .expect("set empty");
    block_on(form.run_pending_validations()).expect("drain");
    assert_eq!(
        form.error("username").expect("error"),
        Some("Username is required".to_string())
    );

    form.set_value("username", "grace", SetValueOptions::default())
        .expect("set valid");
    // Not yet validated: the old error stays until the window elapses.
    assert!(form.error("username").expect("error").is_some());
    block_on(form.run_pending_validations()).expect("drain");
    assert_eq!(form.error("username").expect("error"), None);
    assert!(!form.errors().expect("errors").contains_key("username"));
}

#[test]
fn undo_redo_linearity() {
    let form = FormStateManager::new(
        vec![FormItemDescriptor::input("title")],
        FormStateOptions::new().validate_on_change(false),
    );
    let initial = form.state().expect("state");

    for title in ["one", "two", "three"] {
        form.set_value("title", title, SetValueOptions::default())
            .expect("set");
    }
    let last = form.state().expect("state");

    for _ in 0..3 {
        form.undo().expect("undo");
    }
    assert_eq!(form.state().expect("state"), initial);
    assert!(!form.can_undo().expect("can undo"));

    for _ in 0..3 {
        form.redo().expect("redo");
    }
    assert_eq!(form.state().expect("state"), last);

    form.undo().expect("undo");
    form.set_value("title", "branch", SetValueOptions::default())
        .expect("branch");
    assert!(!form.redo().expect("redo"));
}

#[test]
fn emitter_orders_by_priority() {
    let emitter = EventEmitter::<FormEvent>::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [1, 3, 2] {
        let order = order.clone();
        emitter.on_with(
            FormEventKind::AllTouched,
            ListenOptions::priority(priority),
            move |_| order.lock().expect("order").push(priority),
        );
    }
    assert!(emitter.emit(FormEvent::AllTouched));
    assert_eq!(*order.lock().expect("order"), vec![3, 2, 1]);
}

#[test]
fn emitter_isolates_panicking_listeners() {
    let emitter = EventEmitter::<FormEvent>::new();
    let reached = Arc::new(Mutex::new(false));
    emitter.on(FormEventKind::AllTouched, |_| panic!("listener failure"));
    {
        let reached = reached.clone();
        emitter.on(FormEventKind::AllTouched, move |_| {
            *reached.lock().expect("reached") = true;
        });
    }
    emitter.emit(FormEvent::AllTouched);
    assert!(*reached.lock().expect("reached"));
}

#[test]
fn dirty_tracking_is_value_based() {
    let form = signup_form(5);
    assert!(!form.is_dirty().expect("dirty"));

    form.set_value("terms", true, SetValueOptions::new().validate(false))
        .expect("check");
    assert!(form.is_dirty().expect("dirty"));

    form.set_value("terms", false, SetValueOptions::new().validate(false))
        .expect("uncheck");
    assert!(!form.is_dirty().expect("dirty"));
    assert_eq!(form.history().expect("history").len(), 3);

    form.set_value("email", json!("x@y.z"), SetValueOptions::new().validate(false))
        .expect("email");
    form.reset(None).expect("reset");
    assert!(!form.is_dirty().expect("dirty"));
}

#[test]
fn wait_for_times_out_without_leaking() {
    let form = signup_form(5);
    let outcome = block_on(
        form.events()
            .wait_for(FormEventKind::FormValidated, Some(Duration::from_millis(20))),
    );
    assert!(matches!(outcome, Err(WaitError::Timeout { .. })));
    assert_eq!(form.events().listener_count(FormEventKind::FormValidated), 0);
}
