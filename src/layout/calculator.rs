use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::options::{Breakpoint, BreakpointName, LayoutOptions};
use crate::descriptor::{FieldKey, FormItemDescriptor, dedupe_last_wins};
use crate::event::{Event, EventEmitter};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemPosition {
    pub key: FieldKey,
    pub row: usize,
    pub column: usize,
    pub span: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub visible: bool,
}

pub type ItemPositions = IndexMap<FieldKey, ItemPosition>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayoutResult {
    pub columns: usize,
    pub rows: usize,
    pub column_width: f32,
    pub content_height: f32,
    pub breakpoint: BreakpointName,
    pub collapsed: bool,
    pub positions: ItemPositions,
}

impl LayoutResult {
    fn empty(columns: usize) -> Self {
        Self {
            columns,
            rows: 0,
            column_width: 0.0,
            content_height: 0.0,
            breakpoint: BreakpointName::for_columns(columns),
            collapsed: false,
            positions: ItemPositions::new(),
        }
    }

    pub fn hidden_keys(&self) -> Vec<FieldKey> {
        self.positions
            .values()
            .filter(|position| !position.visible)
            .map(|position| position.key.clone())
            .collect()
    }

    pub fn visible_keys(&self) -> Vec<FieldKey> {
        self.positions
            .values()
            .filter(|position| position.visible)
            .map(|position| position.key.clone())
            .collect()
    }

    pub fn sections(&self, default_rows: usize) -> LayoutSections {
        let (default_keys, expanded_keys): (Vec<_>, Vec<_>) = self
            .positions
            .values()
            .partition(|position| position.row < default_rows);
        LayoutSections {
            default_keys: default_keys.into_iter().map(|p| p.key.clone()).collect(),
            expanded_keys: expanded_keys.into_iter().map(|p| p.key.clone()).collect(),
            default_rows: default_rows.min(self.rows),
            expanded_rows: self.rows.saturating_sub(default_rows),
            total_rows: self.rows,
        }
    }

    /// Same placement with visibility re-derived for `collapsed`.
    fn with_collapsed(&self, collapsed: bool, default_rows: usize) -> Self {
        let positions = self
            .positions
            .iter()
            .map(|(key, position)| {
                let mut position = position.clone();
                position.visible = !collapsed || position.row < default_rows;
                (key.clone(), position)
            })
            .collect();
        Self {
            collapsed,
            positions,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LayoutSections {
    pub default_keys: Vec<FieldKey>,
    pub expanded_keys: Vec<FieldKey>,
    pub default_rows: usize,
    pub expanded_rows: usize,
    pub total_rows: usize,
}

/// Number of grid columns for a container of `container_width` pixels.
pub fn resolve_columns(options: &LayoutOptions, container_width: f32) -> usize {
    if let Some(columns) = options.columns {
        return options.clamp_columns(columns);
    }
    if let Some(tier) = Breakpoint::resolve(&options.breakpoints, container_width) {
        return options.clamp_columns(tier.columns);
    }
    let available = available_width(options, container_width);
    let track = options.min_column_width.max(1.0) + options.column_gap;
    let natural = ((available + options.column_gap) / track).floor();
    let natural = if natural.is_finite() && natural > 0.0 {
        natural as usize
    } else {
        0
    };
    options.clamp_columns(natural)
}

pub fn resolve_breakpoint(options: &LayoutOptions, container_width: f32, columns: usize) -> BreakpointName {
    Breakpoint::resolve(&options.breakpoints, container_width)
        .map(|tier| tier.name)
        .unwrap_or_else(|| BreakpointName::for_columns(columns))
}

/// Effective span: explicit span, then the responsive override for the
/// class implied by `columns` (falling back to smaller classes), then 1.
/// Always within `1..=columns`.
pub fn resolve_span(item: &FormItemDescriptor, columns: usize) -> usize {
    let columns = columns.max(1);
    let requested = item.span.or_else(|| {
        let class = BreakpointName::for_columns(columns);
        item.responsive
            .range(..=class)
            .next_back()
            .map(|(_, span)| *span)
    });
    requested.unwrap_or(1).clamp(1, columns)
}

fn available_width(options: &LayoutOptions, container_width: f32) -> f32 {
    (container_width - options.container_padding * 2.0).max(0.0)
}

/// Row-major packing of `items` in declared order. Hidden descriptors are
/// skipped and duplicate keys resolve to their last descriptor.
pub fn compute_layout(
    items: &[FormItemDescriptor],
    container_width: f32,
    options: &LayoutOptions,
    collapsed: bool,
) -> LayoutResult {
    let columns = resolve_columns(options, container_width);
    let breakpoint = resolve_breakpoint(options, container_width, columns);
    let available = available_width(options, container_width);
    let column_width =
        ((available - options.column_gap * (columns - 1) as f32) / columns as f32).max(0.0);

    let mut cells = Vec::new();
    let (mut row, mut column) = (0usize, 0usize);
    for item in dedupe_last_wins(items).into_values().filter(|item| !item.hidden) {
        let span = resolve_span(&item, columns);
        if column + span > columns {
            row += 1;
            column = 0;
        }
        tracing::trace!(key = %item.key, row, column, span, "placed form item");
        let height = options.item_heights.for_type(&item.field_type);
        cells.push((item.key, row, column, span, height));
        column += span;
    }

    let rows = cells.last().map_or(0, |cell| cell.1 + 1);
    let mut row_heights = vec![0.0f32; rows];
    for &(_, row, _, _, height) in &cells {
        row_heights[row] = row_heights[row].max(height);
    }
    let mut row_offsets = Vec::with_capacity(rows);
    let mut offset = options.container_padding;
    for height in &row_heights {
        row_offsets.push(offset);
        offset += height + options.row_gap;
    }
    let content_height = if rows == 0 {
        0.0
    } else {
        row_heights.iter().sum::<f32>() + options.row_gap * (rows - 1) as f32
    };

    let positions = cells
        .into_iter()
        .map(|(key, row, column, span, height)| {
            let position = ItemPosition {
                key: key.clone(),
                row,
                column,
                span,
                x: options.container_padding + column as f32 * (column_width + options.column_gap),
                y: row_offsets[row],
                width: column_width * span as f32 + options.column_gap * (span - 1) as f32,
                height,
                visible: !collapsed || row < options.default_rows,
            };
            (key, position)
        })
        .collect::<ItemPositions>();

    LayoutResult {
        columns,
        rows,
        column_width,
        content_height,
        breakpoint,
        collapsed,
        positions,
    }
}

#[derive(Clone, Debug)]
pub enum LayoutEvent {
    PositionsUpdated(Arc<LayoutResult>),
    BreakpointChanged {
        from: BreakpointName,
        to: BreakpointName,
    },
    CollapseChanged {
        collapsed: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LayoutEventKind {
    PositionsUpdated,
    BreakpointChanged,
    CollapseChanged,
}

impl Event for LayoutEvent {
    type Kind = LayoutEventKind;

    fn kind(&self) -> LayoutEventKind {
        match self {
            LayoutEvent::PositionsUpdated(_) => LayoutEventKind::PositionsUpdated,
            LayoutEvent::BreakpointChanged { .. } => LayoutEventKind::BreakpointChanged,
            LayoutEvent::CollapseChanged { .. } => LayoutEventKind::CollapseChanged,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

/// Holds the inputs of the last layout pass and its result. Every pass
/// builds a new [`LayoutResult`] and swaps it in; results handed out earlier
/// are never mutated.
pub struct LayoutCalculator {
    options: LayoutOptions,
    items: Vec<FormItemDescriptor>,
    container: ContainerSize,
    collapsed: bool,
    result: Arc<LayoutResult>,
    events: EventEmitter<LayoutEvent>,
}

impl LayoutCalculator {
    pub fn new(options: LayoutOptions) -> Self {
        let collapsed = options.collapsed;
        let columns = options.clamp_columns(options.columns.unwrap_or(options.min_columns));
        Self {
            options,
            items: Vec::new(),
            container: ContainerSize::default(),
            collapsed,
            result: Arc::new(LayoutResult::empty(columns)),
            events: EventEmitter::new(),
        }
    }

    pub fn events(&self) -> &EventEmitter<LayoutEvent> {
        &self.events
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    pub fn container(&self) -> ContainerSize {
        self.container
    }

    pub fn result(&self) -> Arc<LayoutResult> {
        self.result.clone()
    }

    pub fn positions(&self) -> &ItemPositions {
        &self.result.positions
    }

    pub fn columns(&self) -> usize {
        self.result.columns
    }

    pub fn rows(&self) -> usize {
        self.result.rows
    }

    pub fn breakpoint(&self) -> BreakpointName {
        self.result.breakpoint
    }

    pub fn hidden_keys(&self) -> Vec<FieldKey> {
        self.result.hidden_keys()
    }

    pub fn needs_expand(&self) -> bool {
        self.result
            .positions
            .values()
            .any(|position| position.row >= self.options.default_rows)
    }

    pub fn sections(&self) -> LayoutSections {
        self.result.sections(self.options.default_rows)
    }

    /// Replaces the option set; the current collapse state is kept.
    pub fn update_options(&mut self, options: LayoutOptions) -> Arc<LayoutResult> {
        self.options = options;
        self.recalculate()
    }

    pub fn update_items(&mut self, items: Vec<FormItemDescriptor>) -> Arc<LayoutResult> {
        self.items = items;
        self.recalculate()
    }

    /// Returns `false` without recomputing when the width is unchanged.
    pub fn update_container_size(&mut self, width: f32, height: Option<f32>) -> bool {
        if let Some(height) = height {
            self.container.height = height;
        }
        if (self.container.width - width).abs() < f32::EPSILON {
            return false;
        }
        self.container.width = width;
        self.recalculate();
        true
    }

    pub fn set_collapsed(&mut self, collapsed: bool) -> bool {
        if self.collapsed == collapsed {
            return false;
        }
        self.collapsed = collapsed;
        let next = self.result.with_collapsed(collapsed, self.options.default_rows);
        self.result = Arc::new(next);
        self.events.emit(LayoutEvent::CollapseChanged { collapsed });
        self.events
            .emit(LayoutEvent::PositionsUpdated(self.result.clone()));
        true
    }

    pub fn toggle_collapsed(&mut self) -> bool {
        self.set_collapsed(!self.collapsed);
        self.collapsed
    }

    /// Full pass from the current inputs; nothing from the previous result
    /// is reused.
    pub fn recalculate(&mut self) -> Arc<LayoutResult> {
        let previous = self.result.breakpoint;
        let next = compute_layout(
            &self.items,
            self.container.width,
            &self.options,
            self.collapsed,
        );
        tracing::debug!(
            width = self.container.width,
            columns = next.columns,
            rows = next.rows,
            items = next.positions.len(),
            "layout recomputed"
        );
        let breakpoint = next.breakpoint;
        self.result = Arc::new(next);
        if breakpoint != previous {
            tracing::debug!(from = previous.as_str(), to = breakpoint.as_str(), "breakpoint changed");
            self.events.emit(LayoutEvent::BreakpointChanged {
                from: previous,
                to: breakpoint,
            });
        }
        self.events
            .emit(LayoutEvent::PositionsUpdated(self.result.clone()));
        self.result.clone()
    }

    pub fn destroy(&mut self) {
        self.events.remove_all_listeners();
        self.items.clear();
        self.result = Arc::new(LayoutResult::empty(self.result.columns));
    }
}
