mod calculator;
mod options;

#[cfg(test)]
mod tests;

pub use calculator::{
    ContainerSize, ItemPosition, ItemPositions, LayoutCalculator, LayoutEvent, LayoutEventKind,
    LayoutResult, LayoutSections, compute_layout, resolve_breakpoint, resolve_columns,
    resolve_span,
};
pub use options::{Breakpoint, BreakpointName, ItemHeights, LayoutOptions};
