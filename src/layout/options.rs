use serde::{Deserialize, Serialize};

use crate::descriptor::FieldType;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointName {
    Xs,
    Sm,
    Md,
    Lg,
    Xl,
}

impl BreakpointName {
    pub const ALL: [BreakpointName; 5] = [
        BreakpointName::Xs,
        BreakpointName::Sm,
        BreakpointName::Md,
        BreakpointName::Lg,
        BreakpointName::Xl,
    ];

    /// Breakpoint class implied by a grid's column count.
    pub fn for_columns(columns: usize) -> Self {
        match columns {
            0 | 1 => BreakpointName::Xs,
            2 => BreakpointName::Sm,
            3 => BreakpointName::Md,
            4 => BreakpointName::Lg,
            _ => BreakpointName::Xl,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointName::Xs => "xs",
            BreakpointName::Sm => "sm",
            BreakpointName::Md => "md",
            BreakpointName::Lg => "lg",
            BreakpointName::Xl => "xl",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub name: BreakpointName,
    pub min_width: f32,
    pub columns: usize,
}

impl Breakpoint {
    pub fn new(name: BreakpointName, min_width: f32, columns: usize) -> Self {
        Self {
            name,
            min_width,
            columns,
        }
    }

    pub fn standard() -> Vec<Breakpoint> {
        vec![
            Breakpoint::new(BreakpointName::Xs, 0.0, 1),
            Breakpoint::new(BreakpointName::Sm, 576.0, 2),
            Breakpoint::new(BreakpointName::Md, 768.0, 3),
            Breakpoint::new(BreakpointName::Lg, 992.0, 4),
            Breakpoint::new(BreakpointName::Xl, 1200.0, 5),
        ]
    }

    /// Tier with the largest threshold not above `width`; widths below every
    /// threshold fall back to the narrowest tier.
    pub fn resolve(breakpoints: &[Breakpoint], width: f32) -> Option<Breakpoint> {
        let narrowest = breakpoints
            .iter()
            .copied()
            .min_by(|a, b| a.min_width.total_cmp(&b.min_width))?;
        Some(
            breakpoints
                .iter()
                .copied()
                .filter(|breakpoint| width >= breakpoint.min_width)
                .max_by(|a, b| a.min_width.total_cmp(&b.min_width))
                .unwrap_or(narrowest),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemHeights {
    pub input: f32,
    pub textarea: f32,
    pub compact: f32,
}

impl Default for ItemHeights {
    fn default() -> Self {
        Self {
            input: 32.0,
            textarea: 80.0,
            compact: 24.0,
        }
    }
}

impl ItemHeights {
    pub fn for_type(&self, field_type: &FieldType) -> f32 {
        if field_type.is_multiline() {
            self.textarea
        } else if field_type.is_compact() {
            self.compact
        } else {
            self.input
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub min_columns: usize,
    pub max_columns: usize,
    /// Fixed column count; bypasses breakpoints and width derivation.
    pub columns: Option<usize>,
    pub min_column_width: f32,
    pub column_gap: f32,
    pub row_gap: f32,
    pub container_padding: f32,
    /// Empty means the column count is derived from `min_column_width`.
    pub breakpoints: Vec<Breakpoint>,
    pub default_rows: usize,
    pub collapsed: bool,
    pub item_heights: ItemHeights,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            min_columns: 1,
            max_columns: 6,
            columns: None,
            min_column_width: 300.0,
            column_gap: 16.0,
            row_gap: 16.0,
            container_padding: 16.0,
            breakpoints: Vec::new(),
            default_rows: 1,
            collapsed: false,
            item_heights: ItemHeights::default(),
        }
    }
}

impl LayoutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column_bounds(mut self, min_columns: usize, max_columns: usize) -> Self {
        self.min_columns = min_columns.max(1);
        self.max_columns = max_columns.max(self.min_columns);
        self
    }

    pub fn fixed_columns(mut self, columns: usize) -> Self {
        self.columns = Some(columns.max(1));
        self
    }

    pub fn min_column_width(mut self, width: f32) -> Self {
        self.min_column_width = width.max(1.0);
        self
    }

    pub fn gap(mut self, gap: f32) -> Self {
        self.column_gap = gap.max(0.0);
        self.row_gap = gap.max(0.0);
        self
    }

    pub fn column_gap(mut self, gap: f32) -> Self {
        self.column_gap = gap.max(0.0);
        self
    }

    pub fn row_gap(mut self, gap: f32) -> Self {
        self.row_gap = gap.max(0.0);
        self
    }

    pub fn container_padding(mut self, padding: f32) -> Self {
        self.container_padding = padding.max(0.0);
        self
    }

    pub fn breakpoints(mut self, breakpoints: Vec<Breakpoint>) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn default_rows(mut self, rows: usize) -> Self {
        self.default_rows = rows;
        self
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    pub fn item_heights(mut self, heights: ItemHeights) -> Self {
        self.item_heights = heights;
        self
    }

    pub(crate) fn clamp_columns(&self, columns: usize) -> usize {
        let min = self.min_columns.max(1);
        let max = self.max_columns.max(min);
        columns.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tiers_match_container_widths() {
        let tiers = Breakpoint::standard();
        let name = |width: f32| Breakpoint::resolve(&tiers, width).map(|tier| tier.name);
        assert_eq!(name(500.0), Some(BreakpointName::Xs));
        assert_eq!(name(700.0), Some(BreakpointName::Sm));
        assert_eq!(name(900.0), Some(BreakpointName::Md));
        assert_eq!(name(1100.0), Some(BreakpointName::Lg));
        assert_eq!(name(1300.0), Some(BreakpointName::Xl));
        assert_eq!(Breakpoint::resolve(&[], 900.0), None);
    }

    #[test]
    fn width_below_every_threshold_uses_narrowest_tier() {
        let tiers = vec![
            Breakpoint::new(BreakpointName::Lg, 992.0, 4),
            Breakpoint::new(BreakpointName::Md, 600.0, 2),
        ];
        assert_eq!(
            Breakpoint::resolve(&tiers, 100.0).map(|tier| tier.columns),
            Some(2)
        );
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: LayoutOptions =
            serde_json::from_str(r#"{"max_columns": 3, "default_rows": 2}"#).expect("parse");
        assert_eq!(options.max_columns, 3);
        assert_eq!(options.default_rows, 2);
        assert_eq!(options.min_column_width, 300.0);
        assert!(options.breakpoints.is_empty());
    }
}
