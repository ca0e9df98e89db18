//! Console rendering of script progress.
//!
//! Prints comments and statements as they run, result sets as fixed-width
//! tables and a summary block at the end.

use super::observer::ScriptObserver;
use super::RunSummary;
use crate::db::{ColumnDescriptor, RowHandle};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Widest a table column is ever rendered.
pub const MAX_DISPLAY_SIZE: usize = 40;

/// Shown in place of line breaks inside cell values.
pub const LINE_BREAK_GLYPH: &str = "\u{240d}";

/// Column widths and separator of the table being printed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableLayout {
    widths: Vec<usize>,
    separator: String,
}

impl TableLayout {
    fn new(columns: &[ColumnDescriptor]) -> Self {
        let widths: Vec<usize> = columns
            .iter()
            .map(|column| column.display_size.min(MAX_DISPLAY_SIZE))
            .collect();

        let separator = format!(
            "+{}+",
            widths
                .iter()
                .map(|width| "=".repeat(*width))
                .collect::<Vec<_>>()
                .join("+")
        );

        Self { widths, separator }
    }

    fn format_line<S: AsRef<str>>(&self, cells: &[S]) -> String {
        let body = self
            .widths
            .iter()
            .enumerate()
            .map(|(i, width)| {
                let cell = cells.get(i).map(|c| c.as_ref()).unwrap_or("");
                format!("{cell:<width$.width$}")
            })
            .collect::<Vec<_>>()
            .join("|");
        format!("|{body}|")
    }
}

/// Renders a cell value for display.
fn display_cell(value: Option<String>) -> String {
    match value {
        Some(text) => text
            .replace("\r\n", LINE_BREAK_GLYPH)
            .replace(['\r', '\n'], LINE_BREAK_GLYPH),
        None => "NULL".to_string(),
    }
}

/// Observer that prints progress to a writer (stdout by default).
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
    layout: Mutex<Option<TableLayout>>,
}

impl ConsoleObserver {
    /// Creates an observer printing to the given writer.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            layout: Mutex::new(None),
        }
    }

    /// Creates an observer printing to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    fn print(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!("Could not write script output: {e}");
        }
    }

    fn layout(&self) -> MutexGuard<'_, Option<TableLayout>> {
        self.layout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

impl ScriptObserver for ConsoleObserver {
    fn begin_script(&self) {
        *self.layout() = None;
        self.print(&format!("Begin script execution at {}\n\n", clock()));
    }

    fn comment(&self, text: &str) {
        self.print(&format!("{text}\n"));
    }

    fn sql(&self, sql: &str) {
        self.print(&format!("{sql}\n"));
    }

    fn update_count(&self, count: u64) {
        self.print(&format!("{count} row(s) updated\n\n"));
    }

    fn result_set(&self, columns: &[ColumnDescriptor]) {
        let layout = TableLayout::new(columns);
        let labels: Vec<&str> = columns.iter().map(|c| c.label.as_str()).collect();
        let header = layout.format_line(&labels);
        self.print(&format!(
            "{sep}\n{header}\n{sep}\n",
            sep = layout.separator
        ));
        *self.layout() = Some(layout);
    }

    fn row(&self, row: &RowHandle<'_>) {
        let values = match row.values() {
            Ok(values) => values,
            Err(e) => {
                warn!("Could not read row: {e}");
                return;
            }
        };
        let cells: Vec<String> = values.into_iter().map(display_cell).collect();

        let line = {
            let mut layout = self.layout();
            layout
                .get_or_insert_with(|| TableLayout::new(row.columns()))
                .format_line(&cells)
        };
        self.print(&format!("{line}\n"));
    }

    fn no_more_rows(&self) {
        let separator = self
            .layout()
            .take()
            .map(|layout| layout.separator)
            .unwrap_or_default();
        self.print(&format!("{separator}\n\n"));
    }

    fn end_script(&self, summary: &RunSummary) {
        self.print(&format!(
            "End script execution at {}\n\n\
             Successes: {}\n \
             Warnings: {}\n   \
             Errors: {}\n    \
             Total: {}\n\n \
             Duration: {} seconds\n\n",
            clock(),
            summary.success_count,
            summary.warning_count,
            summary.error_count,
            summary.total(),
            summary.duration.as_secs(),
        ));
    }
}
