use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ToolError, ToolResult};
use crate::parser::page_text::{collapse_inline, collect_text};

/// One `<table>` of a document, normalized to a fixed column count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Position among all tables of the document, in document order.
    pub index: usize,
    pub caption: Option<String>,
    pub headers: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
    /// Rows dropped because their cell count did not match the table width.
    pub discrepancies: usize,
}

impl Table {
    pub fn width(&self) -> usize {
        self.headers
            .as_ref()
            .map(Vec::len)
            .or_else(|| self.rows.first().map(Vec::len))
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TableExtractor;

struct RawRow {
    cells: Vec<String>,
    all_header_cells: bool,
    in_thead: bool,
}

impl TableExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Every table of `html` in document order. Nested tables are reported separately.
    pub fn extract(&self, html: &str) -> ToolResult<Vec<Table>> {
        let document = Html::parse_document(html);

        let tables: Vec<Table> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "table")
            .enumerate()
            .map(|(index, element)| Self::build_table(index, element))
            .collect();

        if tables.is_empty() {
            return Err(ToolError::NoTableFound);
        }

        debug!("Extracted {} tables", tables.len());
        Ok(tables)
    }

    fn build_table(index: usize, table: ElementRef) -> Table {
        let caption = table
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "caption")
            .map(cell_text)
            .filter(|text| !text.is_empty());

        let mut raw_rows: Vec<RawRow> = Self::own_rows(table)
            .filter_map(|row| Self::read_row(table, row))
            .collect();

        let header_pos = raw_rows
            .iter()
            .position(|row| row.in_thead)
            .or_else(|| raw_rows.first().filter(|row| row.all_header_cells).map(|_| 0));
        let headers = header_pos.map(|pos| raw_rows.remove(pos).cells);

        let width = headers
            .as_ref()
            .map(Vec::len)
            .or_else(|| raw_rows.first().map(|row| row.cells.len()))
            .unwrap_or(0);

        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut discrepancies = 0;
        for row in raw_rows {
            if row.cells.len() == width {
                rows.push(row.cells);
            } else {
                discrepancies += 1;
            }
        }

        if discrepancies > 0 {
            debug!(
                "Table {} dropped {} rows not matching width {}",
                index, discrepancies, width
            );
        }

        Table {
            index,
            caption,
            headers,
            rows,
            discrepancies,
        }
    }

    /// `<tr>` elements whose nearest enclosing table is `table`.
    fn own_rows<'a>(table: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        table
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "tr")
            .filter(move |row| nearest_table(*row).map(|t| t.id()) == Some(table.id()))
    }

    fn read_row(table: ElementRef, row: ElementRef) -> Option<RawRow> {
        let cells: Vec<ElementRef> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| matches!(el.value().name(), "td" | "th"))
            .collect();

        if cells.is_empty() {
            return None;
        }

        let in_thead = row
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|el| el.id() != table.id())
            .any(|el| el.value().name() == "thead");

        Some(RawRow {
            all_header_cells: cells.iter().all(|c| c.value().name() == "th"),
            cells: cells.into_iter().map(cell_text).collect(),
            in_thead,
        })
    }
}

fn nearest_table(element: ElementRef) -> Option<ElementRef> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

/// Cell text without the text of tables nested inside the cell.
fn cell_text(cell: ElementRef) -> String {
    let mut parts = Vec::new();
    collect_text(cell, &["table", "script", "style"], &mut parts);
    collapse_inline(&parts.join(" "))
}
