use super::*;
use crate::descriptor::{FieldKey, FieldType, FormItemDescriptor};
use crate::event::ListenOptions;
use std::sync::{Arc, Mutex};

fn three_columns() -> LayoutOptions {
    LayoutOptions::new().fixed_columns(3).gap(10.0).container_padding(0.0)
}

fn spans(spans: &[(&str, usize)]) -> Vec<FormItemDescriptor> {
    spans
        .iter()
        .map(|(key, span)| FormItemDescriptor::input(*key).span(*span))
        .collect()
}

fn cell(result: &LayoutResult, key: &str) -> (usize, usize, usize) {
    let position = result.positions.get(key).expect("position exists");
    (position.row, position.column, position.span)
}

#[test]
fn rows_advance_when_span_does_not_fit() {
    let items = spans(&[("a", 2), ("b", 1), ("c", 1), ("d", 3)]);
    let result = compute_layout(&items, 620.0, &three_columns(), false);

    assert_eq!(cell(&result, "a"), (0, 0, 2));
    assert_eq!(cell(&result, "b"), (0, 2, 1));
    assert_eq!(cell(&result, "c"), (1, 0, 1));
    assert_eq!(cell(&result, "d"), (2, 0, 3));
    assert_eq!(result.rows, 3);
}

#[test]
fn oversized_span_is_clamped_and_starts_a_row() {
    let items = spans(&[("a", 1), ("wide", 9), ("b", 1)]);
    let result = compute_layout(&items, 620.0, &three_columns(), false);

    assert_eq!(cell(&result, "wide"), (1, 0, 3));
    assert_eq!(cell(&result, "b"), (2, 0, 1));
}

#[test]
fn pixel_geometry_accumulates_columns_and_gaps() {
    let items = vec![
        FormItemDescriptor::input("name").span(2),
        FormItemDescriptor::new("agree", FieldType::Switch),
        FormItemDescriptor::new("notes", FieldType::Textarea).span(3),
    ];
    let result = compute_layout(&items, 620.0, &three_columns(), false);

    assert_eq!(result.column_width, 200.0);
    let name = &result.positions["name"];
    assert_eq!((name.x, name.y, name.width, name.height), (0.0, 0.0, 410.0, 32.0));
    let agree = &result.positions["agree"];
    assert_eq!((agree.x, agree.width, agree.height), (420.0, 200.0, 24.0));
    let notes = &result.positions["notes"];
    // First row is as tall as its tallest item.
    assert_eq!((notes.y, notes.width, notes.height), (42.0, 620.0, 80.0));
    assert_eq!(result.content_height, 32.0 + 10.0 + 80.0);
}

#[test]
fn layout_is_deterministic() {
    let items = spans(&[("a", 1), ("b", 2), ("c", 1), ("d", 1), ("e", 4)]);
    let options = LayoutOptions::new();
    let first = compute_layout(&items, 1280.0, &options, true);
    let second = compute_layout(&items, 1280.0, &options, true);
    assert_eq!(first, second);
}

#[test]
fn natural_column_count_uses_min_width_and_bounds() {
    let options = LayoutOptions::new()
        .min_column_width(200.0)
        .gap(20.0)
        .container_padding(10.0)
        .column_bounds(2, 4);
    // available = 880, (880 + 20) / 220 = 4.09
    assert_eq!(resolve_columns(&options, 900.0), 4);
    // available = 460, (460 + 20) / 220 = 2.18
    assert_eq!(resolve_columns(&options, 480.0), 2);
    // below the minimum bound
    assert_eq!(resolve_columns(&options, 100.0), 2);
    // above the maximum bound
    assert_eq!(resolve_columns(&options, 5000.0), 4);
}

#[test]
fn breakpoints_pick_the_matching_tier() {
    let options = LayoutOptions::new().breakpoints(Breakpoint::standard());
    assert_eq!(resolve_columns(&options, 500.0), 1);
    assert_eq!(resolve_columns(&options, 800.0), 3);
    assert_eq!(resolve_columns(&options, 1300.0), 5);

    let bounded = options.column_bounds(1, 3);
    assert_eq!(resolve_columns(&bounded, 1300.0), 3);
}

#[test]
fn responsive_override_applies_without_explicit_span() {
    let item = FormItemDescriptor::input("city")
        .responsive(BreakpointName::Sm, 2)
        .responsive(BreakpointName::Lg, 3);
    assert_eq!(resolve_span(&item, 1), 1);
    assert_eq!(resolve_span(&item, 2), 2);
    // md has no override, so sm applies
    assert_eq!(resolve_span(&item, 3), 2);
    assert_eq!(resolve_span(&item, 4), 3);

    let explicit = item.clone().span(1);
    assert_eq!(resolve_span(&explicit, 4), 1);
}

#[test]
fn collapsed_layout_hides_rows_past_default() {
    let items = spans(&[("a", 2), ("b", 1), ("c", 1), ("d", 3)]);
    let options = three_columns().default_rows(1);
    let result = compute_layout(&items, 620.0, &options, true);

    assert_eq!(result.visible_keys(), vec![FieldKey::from("a"), FieldKey::from("b")]);
    assert_eq!(result.hidden_keys(), vec![FieldKey::from("c"), FieldKey::from("d")]);
    assert_eq!(result.positions.len(), 4);
    let sections = result.sections(1);
    assert_eq!(sections.expanded_rows, 2);
    assert_eq!(sections.total_rows, 3);
}

#[test]
fn hidden_descriptors_and_empty_lists_yield_no_positions() {
    let items = vec![FormItemDescriptor::input("secret").hidden(true)];
    let result = compute_layout(&items, 620.0, &three_columns(), false);
    assert!(result.positions.is_empty());
    assert_eq!(result.rows, 0);
    assert_eq!(result.content_height, 0.0);

    let empty = compute_layout(&[], 620.0, &three_columns(), false);
    assert_eq!(empty.rows, 0);
}

#[test]
fn duplicate_keys_are_placed_once() {
    let items = spans(&[("a", 1), ("b", 1), ("a", 2)]);
    let result = compute_layout(&items, 620.0, &three_columns(), false);
    assert_eq!(result.positions.len(), 2);
    assert_eq!(cell(&result, "b"), (0, 0, 1));
    assert_eq!(cell(&result, "a"), (0, 1, 2));
}

#[test]
fn calculator_skips_recompute_for_unchanged_width() {
    let mut calculator = LayoutCalculator::new(three_columns());
    let updates = Arc::new(Mutex::new(0usize));
    {
        let updates = updates.clone();
        calculator
            .events()
            .on(LayoutEventKind::PositionsUpdated, move |_| {
                *updates.lock().expect("counter") += 1;
            });
    }

    calculator.update_items(spans(&[("a", 1), ("b", 1)]));
    assert!(calculator.update_container_size(620.0, Some(400.0)));
    assert!(!calculator.update_container_size(620.0, Some(500.0)));
    assert_eq!(calculator.container().height, 500.0);
    assert_eq!(*updates.lock().expect("counter"), 2);
}

#[test]
fn collapse_then_expand_restores_visible_set() {
    let mut calculator = LayoutCalculator::new(three_columns().default_rows(1));
    calculator.update_container_size(620.0, None);
    calculator.update_items(spans(&[("a", 2), ("b", 1), ("c", 1), ("d", 3)]));
    let before = calculator.result();

    assert!(calculator.set_collapsed(true));
    assert_eq!(calculator.hidden_keys().len(), 2);
    assert!(calculator.needs_expand());

    assert!(calculator.set_collapsed(false));
    assert_eq!(calculator.result().positions, before.positions);
    // The earlier snapshot is untouched by later passes.
    assert!(before.positions.values().all(|position| position.visible));
}

#[test]
fn breakpoint_change_is_announced() {
    let mut calculator =
        LayoutCalculator::new(LayoutOptions::new().breakpoints(Breakpoint::standard()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        calculator.events().on_with(
            LayoutEventKind::BreakpointChanged,
            ListenOptions::priority(1),
            move |event| {
                if let LayoutEvent::BreakpointChanged { to, .. } = event {
                    seen.lock().expect("seen").push(*to);
                }
            },
        );
    }
    calculator.update_container_size(800.0, None);
    calculator.update_container_size(810.0, None);
    calculator.update_container_size(1250.0, None);
    assert_eq!(
        *seen.lock().expect("seen"),
        vec![BreakpointName::Md, BreakpointName::Xl]
    );
    assert_eq!(calculator.columns(), 5);
}

#[test]
fn config_change_fully_recomputes() {
    let mut calculator = LayoutCalculator::new(three_columns());
    calculator.update_container_size(620.0, None);
    calculator.update_items(spans(&[("a", 2), ("b", 2)]));
    assert_eq!(calculator.rows(), 2);

    calculator.update_options(LayoutOptions::new().fixed_columns(4).container_padding(0.0));
    assert_eq!(calculator.rows(), 1);
    assert_eq!(calculator.positions().get("b").map(|p| p.column), Some(2));
}
