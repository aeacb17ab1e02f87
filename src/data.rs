//! Tables backed by `polars` data frames, and the typed view of their cells.
use std::cmp::Ordering;
use std::f64;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use failure;
use ordered_float::OrderedFloat;
use polars::prelude::{Column, CsvReadOptions, DataFrame, DataType, NullValues, SerReader};

use super::WrapperError;

/// Textual spellings of a missing cell, as written by Stata and pandas exports.
const MISSING_MARKERS: [&str; 5] = ["", ".", "NA", "NaN", "nan"];

/// 2^63: every integral float in `[-2^63, 2^63)` is exactly an `i64`.
const INT_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// A categorical identifier: an item name, a user, a session
/// or a purchase record.
///
/// Integers and floats order numerically among themselves and sort
/// before all text labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    /// Integer label.
    Int(i64),
    /// Non-integral or out of `i64` range number.
    Float(OrderedFloat<f64>),
    /// Text label.
    Text(String),
}

impl Label {
    /// Integral floats inside the `i64` range become `Int`, anything else
    /// stays a float.
    pub fn from_float(value: f64) -> Label {
        if value.fract() == 0.0 && value >= -INT_BOUND && value < INT_BOUND {
            Label::Int(value as i64)
        } else {
            Label::Float(OrderedFloat(value))
        }
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Label) -> Ordering {
        match (self, other) {
            (Label::Int(a), Label::Int(b)) => a.cmp(b),
            (Label::Float(a), Label::Float(b)) => a.cmp(b),
            (Label::Int(a), Label::Float(b)) => OrderedFloat(*a as f64).cmp(b).then(Ordering::Less),
            (Label::Float(a), Label::Int(b)) => a.cmp(&OrderedFloat(*b as f64)).then(Ordering::Greater),
            (Label::Text(a), Label::Text(b)) => a.cmp(b),
            (Label::Text(_), _) => Ordering::Greater,
            (_, Label::Text(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Label) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Label::Int(value) => write!(f, "{}", value),
            Label::Float(value) => write!(f, "{}", value),
            Label::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for Label {
    fn from(value: i64) -> Label {
        Label::Int(value)
    }
}

impl From<f64> for Label {
    fn from(value: f64) -> Label {
        Label::from_float(value)
    }
}

impl<'a> From<&'a str> for Label {
    fn from(value: &'a str) -> Label {
        Label::Text(value.to_owned())
    }
}

impl From<String> for Label {
    fn from(value: String) -> Label {
        Label::Text(value)
    }
}

/// A single typed table cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    /// Empty or explicitly missing.
    Missing,
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Anything else.
    Text(String),
}

/// Digits with an optional sign.
fn is_integer_literal(field: &str) -> bool {
    let digits = field.trim_start_matches(&['+', '-'][..]);

    !digits.is_empty() && field.len() - digits.len() <= 1 && digits.bytes().all(|x| x.is_ascii_digit())
}

impl Cell {
    /// Type a raw field: missing markers, then integers, then floats,
    /// falling back to text.
    ///
    /// Integers too large for `i64` stay text, so distinct long
    /// identifiers never collapse into one number.
    pub fn parse(field: &str) -> Cell {
        if MISSING_MARKERS.contains(&field) {
            Cell::Missing
        } else if let Ok(value) = field.parse::<i64>() {
            Cell::Int(value)
        } else if is_integer_literal(field) {
            Cell::Text(field.to_owned())
        } else if let Ok(value) = field.parse::<f64>() {
            Cell::Float(value)
        } else {
            Cell::Text(field.to_owned())
        }
    }

    /// The cell as an identifier.
    pub fn to_label(&self) -> Option<Label> {
        match self {
            Cell::Missing => None,
            Cell::Int(value) => Some(Label::Int(*value)),
            Cell::Float(value) if value.is_nan() => None,
            Cell::Float(value) => Some(Label::from_float(*value)),
            Cell::Text(value) => Some(Label::Text(value.clone())),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Missing => write!(f, "NA"),
            Cell::Int(value) => write!(f, "{}", value),
            Cell::Float(value) => write!(f, "{}", value),
            Cell::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Cell {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Cell {
        if value.is_nan() {
            Cell::Missing
        } else {
            Cell::Float(value)
        }
    }
}

impl<'a> From<&'a str> for Cell {
    fn from(value: &'a str) -> Cell {
        Cell::Text(value.to_owned())
    }
}

impl From<Label> for Cell {
    fn from(value: Label) -> Cell {
        match value {
            Label::Int(value) => Cell::Int(value),
            Label::Float(value) => Cell::Float(value.into_inner()),
            Label::Text(value) => Cell::Text(value),
        }
    }
}

/// Every field is read as text; typing happens per column on access.
fn csv_options() -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|options| {
            options.with_null_values(Some(NullValues::AllColumns(
                MISSING_MARKERS.iter().map(|&x| x.into()).collect(),
            )))
        })
}

/// A table with named columns.
///
/// Identifier columns are read through [`Table::labels`], covariate and
/// choice columns through [`Table::numeric`]; both accept frames of any
/// column types.
#[derive(Clone, Debug, Default)]
pub struct Table {
    frame: DataFrame,
}

impl Table {
    /// Wrap a data frame.
    pub fn new(frame: DataFrame) -> Self {
        Table { frame: frame }
    }

    /// Read a headed CSV table.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Table, failure::Error> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;

        let frame = csv_options()
            .into_reader_with_file_handle(Cursor::new(buffer))
            .finish()?;

        Ok(Table::new(frame))
    }

    /// Read a headed CSV file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Table, failure::Error> {
        let file = File::open(path)?;
        let frame = csv_options().into_reader_with_file_handle(file).finish()?;

        Ok(Table::new(frame))
    }

    /// Read headed CSV text.
    pub fn from_csv_str(data: &str) -> Result<Table, failure::Error> {
        Table::from_reader(data.as_bytes())
    }

    /// The underlying data frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Column names, in input order.
    pub fn headers(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|x| x.to_string())
            .collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// The column `name`; `table` names the table in the error.
    pub fn column(&self, name: &str, table: &str) -> Result<&Column, WrapperError> {
        self.frame
            .column(name)
            .map_err(|_| WrapperError::MissingColumn {
                column: name.to_owned(),
                table: table.to_owned(),
            })
    }

    /// A column as text, `None` for missing cells.
    fn text(&self, name: &str, table: &str) -> Result<Vec<Option<String>>, WrapperError> {
        let text = self.column(name, table)?.cast(&DataType::String)?;
        let values = text.str()?.into_iter().map(|x| x.map(|x| x.to_owned())).collect();

        Ok(values)
    }

    /// A column read as identifiers. Empty cells are an error.
    pub fn labels(&self, name: &str, table: &str) -> Result<Vec<Label>, WrapperError> {
        self.text(name, table)?
            .into_iter()
            .enumerate()
            .map(|(row, field)| {
                field
                    .and_then(|x| Cell::parse(&x).to_label())
                    .ok_or_else(|| WrapperError::MissingValue {
                        column: name.to_owned(),
                        row: row,
                    })
            })
            .collect()
    }

    /// The distinct identifiers of a column, in no particular order.
    pub fn distinct_labels(&self, name: &str, table: &str) -> Result<Vec<Label>, WrapperError> {
        let distinct = self.column(name, table)?.cast(&DataType::String)?.unique()?;

        let labels: Option<Vec<Label>> = distinct
            .str()?
            .into_iter()
            .map(|field| field.and_then(|x| Cell::parse(x).to_label()))
            .collect();

        match labels {
            Some(labels) => Ok(labels),
            // A missing cell: rescan to report its row.
            None => self.labels(name, table),
        }
    }

    /// A column read as numbers, with `NaN` for empty cells.
    pub fn numeric(&self, name: &str, table: &str) -> Result<Vec<f64>, WrapperError> {
        let column = self.column(name, table)?;
        let numbers = column.cast(&DataType::Float64)?;
        let text = column.cast(&DataType::String)?;

        izip!(numbers.f64()?, text.str()?)
            .enumerate()
            .map(|(row, (number, field))| match (number, field) {
                (Some(value), _) => Ok(value),
                (None, None) => Ok(f64::NAN),
                (None, Some(field)) => match Cell::parse(field) {
                    Cell::Missing => Ok(f64::NAN),
                    _ => Err(WrapperError::NonNumeric {
                        column: name.to_owned(),
                        row: row,
                        value: field.to_owned(),
                    }),
                },
            })
            .collect()
    }

    /// The first `num_rows` rows as typed cells.
    pub fn head(&self, num_rows: usize) -> Result<Vec<Vec<Cell>>, WrapperError> {
        let head = Table::new(self.frame.head(Some(num_rows)));

        let columns = head
            .headers()
            .iter()
            .map(|name| -> Result<Vec<Cell>, WrapperError> {
                Ok(head
                    .text(name, "the table preview")?
                    .into_iter()
                    .map(|field| field.map(|x| Cell::parse(&x)).unwrap_or(Cell::Missing))
                    .collect())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((0..head.len())
            .map(|row| columns.iter().map(|column| column[row].clone()).collect())
            .collect())
    }
}

impl From<DataFrame> for Table {
    fn from(frame: DataFrame) -> Table {
        Table::new(frame)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn cell_typing() {
        assert_eq!(Cell::parse(""), Cell::Missing);
        assert_eq!(Cell::parse("."), Cell::Missing);
        assert_eq!(Cell::parse("NaN"), Cell::Missing);
        assert_eq!(Cell::parse("42"), Cell::Int(42));
        assert_eq!(Cell::parse("-3"), Cell::Int(-3));
        assert_eq!(Cell::parse("1.25"), Cell::Float(1.25));
        assert_eq!(Cell::parse("apple"), Cell::Text("apple".to_owned()));
    }

    #[test]
    fn oversized_integers_stay_distinct() {
        assert_eq!(
            Cell::parse("18446744073709551610"),
            Cell::Text("18446744073709551610".to_owned())
        );
        assert_ne!(
            Cell::parse("18446744073709551610").to_label(),
            Cell::parse("18446744073709551611").to_label()
        );

        // 2^63 saturates an `as i64` cast; it must not become i64::MAX.
        assert_eq!(
            Cell::Float(INT_BOUND).to_label(),
            Some(Label::Float(OrderedFloat(INT_BOUND)))
        );
        assert_eq!(Cell::Float(1e20).to_label(), Some(Label::Float(OrderedFloat(1e20))));
    }

    #[test]
    fn cell_conversions() {
        assert_eq!(Cell::Float(3.0).to_label(), Some(Label::Int(3)));
        assert_eq!(Cell::Float(0.5).to_label(), Some(Label::Float(OrderedFloat(0.5))));
        assert_eq!(Cell::Missing.to_label(), None);
        assert_eq!(Cell::Float(f64::NAN).to_label(), None);
        assert_eq!(Cell::from(Label::from(2.5)), Cell::Float(2.5));
    }

    #[test]
    fn labels_sort_numbers_numerically_before_text() {
        let mut labels = vec![
            Label::from("b"),
            Label::from(10.25),
            Label::from(10),
            Label::from("a"),
            Label::from(2.5),
            Label::from(2),
            Label::from(1.5),
        ];
        labels.sort();

        assert_eq!(
            labels,
            vec![
                Label::from(1.5),
                Label::from(2),
                Label::from(2.5),
                Label::from(10),
                Label::from(10.25),
                Label::from("a"),
                Label::from("b"),
            ]
        );
        assert_eq!(Label::from(4.0), Label::Int(4));
    }

    #[test]
    fn load_csv() {
        let table = Table::from_csv_str("record,item,price\n1,A,1.5\n1,B,\n2,C,3\n").unwrap();

        assert_eq!(table.headers(), vec!["record", "item", "price"]);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.labels("item", "main table").unwrap(),
            vec![Label::from("A"), Label::from("B"), Label::from("C")]
        );
        assert_eq!(
            table.labels("record", "main table").unwrap(),
            vec![Label::from(1), Label::from(1), Label::from(2)]
        );

        let prices = table.numeric("price", "main table").unwrap();
        assert_eq!(prices[0], 1.5);
        assert!(prices[1].is_nan());
        assert_eq!(prices[2], 3.0);
    }

    #[test]
    fn typed_frames_read_like_csv() {
        let frame = DataFrame::new(vec![
            Column::new("item".into(), vec![3.0, 1.5, 3.0]),
            Column::new("size".into(), vec![1i64, 2, 3]),
        ])
        .unwrap();
        let table = Table::from(frame);

        let mut distinct = table.distinct_labels("item", "items").unwrap();
        distinct.sort();

        assert_eq!(distinct, vec![Label::from(1.5), Label::from(3)]);
        assert_eq!(table.numeric("size", "items").unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_column_and_values() {
        let table = Table::from_csv_str("record,item\n1,A\n2,\n").unwrap();

        match table.column("user", "main table") {
            Err(WrapperError::MissingColumn { column, .. }) => assert_eq!(column, "user"),
            other => panic!("unexpected {:?}", other),
        }

        match table.labels("item", "main table") {
            Err(WrapperError::MissingValue { row, .. }) => assert_eq!(row, 1),
            other => panic!("unexpected {:?}", other),
        }

        match table.distinct_labels("item", "main table") {
            Err(WrapperError::MissingValue { row, .. }) => assert_eq!(row, 1),
            other => panic!("unexpected {:?}", other),
        }

        match table.numeric("item", "main table") {
            Err(WrapperError::NonNumeric { row, value, .. }) => {
                assert_eq!(row, 0);
                assert_eq!(value, "A");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn head_types_cells() {
        let table = Table::from_csv_str("record,item,price\n1,A,1.5\n1,B,NA\n2,C,3\n").unwrap();

        let head = table.head(2).unwrap();

        assert_eq!(
            head,
            vec![
                vec![Cell::Int(1), Cell::from("A"), Cell::Float(1.5)],
                vec![Cell::Int(1), Cell::from("B"), Cell::Missing],
            ]
        );
    }
}
