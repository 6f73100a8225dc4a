use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

/// Angular Material renders either element tables or native ones.
const ROW_SELECTOR: &str = "mat-row, tr.mat-mdc-row";
const CELL_SELECTOR: &str = "mat-cell, td.mat-mdc-cell";

/// Minimum cells for a row to be a pattern row.
pub const MIN_CELLS: usize = 4;

// ── Results table ─────────────────────────────────────────────────────────────

/// Extract the text of every pattern row on the page.
pub fn parse_pattern_rows(html: &str) -> Result<Vec<Vec<String>>> {
    let doc = Html::parse_document(html);

    let row_sel = Selector::parse(ROW_SELECTOR)
        .map_err(|e| anyhow::anyhow!("row selector: {:?}", e))?;
    let cell_sel = Selector::parse(CELL_SELECTOR)
        .map_err(|e| anyhow::anyhow!("cell selector: {:?}", e))?;

    let rows = doc
        .select(&row_sel)
        .map(|row| row.select(&cell_sel).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.len() >= MIN_CELLS)
        .collect();

    Ok(rows)
}

/// Joins text nodes with single spaces, the way the cell reads on screen.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
