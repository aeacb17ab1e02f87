//! A structured report of a built wrapper. Rendering it is up to the caller.
use std::collections::BTreeMap;
use std::fmt;

use super::data::{Cell, Label, Table};
use super::WrapperError;

/// The first rows of a table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TablePreview {
    /// Column names.
    pub headers: Vec<String>,
    /// Up to the requested number of rows.
    pub rows: Vec<Vec<Cell>>,
    /// Number of rows in the whole table.
    pub total_rows: usize,
}

impl TablePreview {
    /// Take the first `num_rows` rows of `table`.
    pub fn new(table: &Table, num_rows: usize) -> Result<Self, WrapperError> {
        Ok(TablePreview {
            headers: table.headers(),
            rows: table.head(num_rows)?,
            total_rows: table.len(),
        })
    }
}

/// What a built wrapper holds: vocabulary, record counts, a preview of
/// the input and the shapes of every derived array.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    /// Item names in encoded order.
    pub items: Vec<Label>,
    /// Number of purchase records.
    pub num_records: usize,
    /// Choice-set size -> number of purchase records with that size.
    pub choice_set_sizes: BTreeMap<usize, usize>,
    /// Head of the main table.
    pub main_preview: TablePreview,
    /// Dataset field -> array shape, for present fields only.
    pub dataset_shapes: BTreeMap<String, Vec<usize>>,
}

fn write_row<T: fmt::Display>(f: &mut fmt::Formatter, cells: &[T], width: usize) -> fmt::Result {
    for cell in cells {
        write!(f, "{:>width$}", cell.to_string(), width = width)?;
    }
    writeln!(f)
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "* Space of {} items:", self.items.len())?;
        for (idx, item) in self.items.iter().enumerate() {
            writeln!(f, "  {:>4}  {}", idx, item)?;
        }

        writeln!(f, "* Number of purchase records/cases: {}.", self.num_records)?;

        let sizes: Vec<String> = self
            .choice_set_sizes
            .iter()
            .map(|(size, count)| format!("size {}: occurrence {}", size, count))
            .collect();
        writeln!(f, "* Choice set sizes: {}", sizes.join(", "))?;

        let preview = &self.main_preview;
        let width = preview
            .headers
            .iter()
            .map(|x| x.len())
            .chain(preview.rows.iter().flatten().map(|x| x.to_string().len()))
            .max()
            .unwrap_or(0)
            + 2;

        writeln!(
            f,
            "* Preview of main data frame ({} of {} rows):",
            preview.rows.len(),
            preview.total_rows
        )?;
        write_row(f, &preview.headers, width)?;
        for row in &preview.rows {
            write_row(f, row, width)?;
        }

        writeln!(f, "* Preview of ChoiceDataset:")?;
        for (key, shape) in &self.dataset_shapes {
            writeln!(f, "  {}: {:?}", key, shape)?;
        }

        Ok(())
    }
}
