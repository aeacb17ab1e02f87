#![deny(missing_docs)]
//! # choicedata
//!
//! `choicedata` turns long-format discrete-choice records (one row per
//! candidate item per purchase record) into a dense [`ChoiceDataset`]:
//! items, users and sessions are encoded to contiguous indices, covariate
//! tables are aligned to those indices and materialized as `ndarray`
//! arrays, and varying choice sets are turned into an item availability
//! mask. Input tables are `polars` data frames.
//!
//! ## Example
//!
//! ```rust
//! # extern crate choicedata;
//! use choicedata::{ChoiceConfig, Table};
//!
//! let main = Table::from_csv_str(
//!     "record,item,chosen,session\n\
//!      1,A,1,s1\n\
//!      1,B,0,s1\n\
//!      2,B,0,s2\n\
//!      2,C,1,s2\n",
//! ).unwrap();
//! let prices = Table::from_csv_str(
//!     "session,item,price\n\
//!      s1,A,1.5\n\
//!      s1,B,2.0\n\
//!      s2,B,2.5\n\
//!      s2,C,3.0\n",
//! ).unwrap();
//!
//! let wrapper = ChoiceConfig::new("record", "item", "chosen")
//!     .session_index_column("session")
//!     .price_observable("price", prices)
//!     .build(main)
//!     .unwrap();
//!
//! assert_eq!(wrapper.len(), 2);
//! assert_eq!(wrapper.dataset().item_index().to_vec(), vec![0, 2]);
//! println!("{}", wrapper.summary(5).unwrap());
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;

#[macro_use]
extern crate tracing;

extern crate ndarray;
extern crate ordered_float;
extern crate polars;
extern crate rayon;
extern crate serde;

use polars::prelude::PolarsError;

pub mod availability;
pub mod data;
pub mod dataset;
pub mod encoder;
pub mod observable;
pub mod summary;
pub mod tensor;
pub mod wrapper;

pub use crate::data::{Cell, Label, Table};
pub use crate::dataset::{ChoiceDataset, DatasetParts, ObservableTensor};
pub use crate::encoder::LabelEncoder;
pub use crate::observable::{EntityKind, Observable};
pub use crate::summary::Summary;
pub use crate::wrapper::{ChoiceConfig, ChoiceDataWrapper, Columns, Format};

/// Alias for encoded item indices.
pub type ItemId = usize;
/// Alias for encoded user indices.
pub type UserId = usize;
/// Alias for encoded session indices.
pub type SessionId = usize;

/// Errors raised while building a choice dataset.
///
/// Every variant is fatal: construction either produces a complete
/// dataset or nothing.
#[derive(Debug, Fail)]
pub enum WrapperError {
    /// The requested input format is not implemented.
    #[fail(
        display = "Format {} is not supported, only {:?} are supported.",
        format, supported
    )]
    UnsupportedFormat {
        /// The requested format.
        format: String,
        /// Formats that are implemented.
        supported: Vec<&'static str>,
    },
    /// An operation needs an identifier column that was not configured.
    #[fail(display = "{} requires the {} column, which was not provided.", what, column)]
    MissingIdentifier {
        /// What needed the identifier.
        what: String,
        /// The kind of identifier column that is missing.
        column: &'static str,
    },
    /// A label was never seen when the encoder was fitted.
    #[fail(display = "Label {} not found in {}.", label, scope)]
    KeyNotFound {
        /// The encoder or observable that was searched.
        scope: String,
        /// The offending label.
        label: Label,
    },
    /// An encoded index is outside the encoder's range.
    #[fail(display = "Index {} out of range for the {} encoder of size {}.", index, encoder, size)]
    IndexOutOfRange {
        /// Name of the encoder.
        encoder: String,
        /// The offending index.
        index: usize,
        /// Number of classes in the encoder.
        size: usize,
    },
    /// Array shapes or orderings disagree with the canonical encoder order.
    #[fail(display = "Shape mismatch in {}: {}", what, detail)]
    ShapeMismatch {
        /// The array or table being checked.
        what: String,
        /// Description of the disagreement.
        detail: String,
    },
    /// A purchase record violates the long-format invariants.
    #[fail(display = "Malformed purchase record {}: {}", record, reason)]
    MalformedRecord {
        /// The purchase record identifier.
        record: Label,
        /// What is wrong with it.
        reason: String,
    },
    /// A named column does not exist in a table.
    #[fail(display = "Column {} not found in {}.", column, table)]
    MissingColumn {
        /// The missing column.
        column: String,
        /// The table that was searched.
        table: String,
    },
    /// An identifier cell is empty.
    #[fail(display = "Missing value in column {} at row {}.", column, row)]
    MissingValue {
        /// The column holding the empty cell.
        column: String,
        /// Zero-based row position.
        row: usize,
    },
    /// A covariate or choice cell is not numeric.
    #[fail(display = "Non-numeric value {:?} in column {} at row {}.", value, column, row)]
    NonNumeric {
        /// The column holding the cell.
        column: String,
        /// Zero-based row position.
        row: usize,
        /// The cell's text.
        value: String,
    },
    /// An observable table contains the same index more than once.
    #[fail(display = "Duplicate index {} in observable {}.", index, observable)]
    DuplicateIndex {
        /// Namespaced observable key.
        observable: String,
        /// The repeated index, rendered as text.
        index: String,
    },
    /// Two observables share the same namespaced key.
    #[fail(display = "Observable {} was supplied more than once.", key)]
    DuplicateObservable {
        /// Namespaced observable key.
        key: String,
    },
    /// A data frame operation failed.
    #[fail(display = "Data frame error: {}", _0)]
    Frame(#[cause] PolarsError),
}

impl From<PolarsError> for WrapperError {
    fn from(error: PolarsError) -> WrapperError {
        WrapperError::Frame(error)
    }
}
