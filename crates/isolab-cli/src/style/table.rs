//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

/// Creates a styled table of rows under the given column names.
pub fn rows_table(columns: &[&str], rows: &[Vec<String>]) -> Table {
    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = columns
        .iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col)
                    .add_attribute(Attribute::Bold)
                    .fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    table
}
