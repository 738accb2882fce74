use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::pipeline::StageOutcome;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn outcome_cell(outcome: StageOutcome) -> Cell {
    match outcome {
        StageOutcome::Cached => Cell::new("cached").fg(TableColor::Yellow),
        StageOutcome::Computed => Cell::new("computed").fg(TableColor::Green),
    }
}

pub fn rank_cell(rank: Option<u32>) -> Cell {
    rank.map_or_else(
        || Cell::new("-").fg(TableColor::DarkGrey),
        |rank| Cell::new(rank),
    )
}
