//! Covariate tables and their alignment to the canonical encoder order.
use std::f64;
use std::fmt;

use ndarray::Array2;
use polars::prelude::{col, Column, DataFrame, Expr, IntoLazy, JoinArgs, JoinType, SortMultipleOptions};

use super::data::{Label, Table};
use super::encoder::{EncodedColumn, Encoders};
use super::WrapperError;

/// The entity an observable is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Varies by item.
    Item,
    /// Varies by user.
    User,
    /// Varies by session.
    Session,
    /// Varies by (session, item) pair.
    Price,
}

impl EntityKind {
    /// Prefix of the namespaced dataset key.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::User => "user",
            EntityKind::Session => "session",
            EntityKind::Price => "price",
        }
    }

    /// Recover the kind from a namespaced key such as `item_brand`.
    pub fn from_key(key: &str) -> Option<EntityKind> {
        [
            EntityKind::Item,
            EntityKind::User,
            EntityKind::Session,
            EntityKind::Price,
        ]
            .iter()
            .cloned()
            .find(|kind| key.starts_with(&format!("{}_", kind.prefix())))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// A named covariate table.
///
/// Item, user and session tables carry a column named like the
/// corresponding identifier column of the main table; price tables carry
/// both the session and the item-name columns. Every other column is a
/// numeric covariate.
#[derive(Clone, Debug)]
pub struct Observable {
    kind: EntityKind,
    name: String,
    table: Table,
}

impl Observable {
    /// A covariate table of `kind`, keyed as `{kind}_{name}`.
    pub fn new<S: Into<String>>(kind: EntityKind, name: S, table: Table) -> Self {
        Observable {
            kind: kind,
            name: name.into(),
            table: table,
        }
    }

    /// The entity the table is indexed by.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Name without the kind prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The covariate table.
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// The namespaced dataset key, e.g. `item_brand`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.kind.prefix(), self.name)
    }
}

/// An observable re-indexed to encoder order.
///
/// The frame holds the encoded position of every index column followed by
/// the covariates. Entity observables have one row per encoded label.
/// Price observables have one row per (session, item) pair, session-major,
/// with null covariates for pairs the input did not mention.
#[derive(Clone, Debug)]
pub struct AlignedObservable {
    key: String,
    kind: EntityKind,
    index_columns: Vec<String>,
    columns: Vec<String>,
    frame: DataFrame,
}

impl AlignedObservable {
    /// Namespaced dataset key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entity the rows are indexed by.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Index column names: the identifier column, or the session and item
    /// columns for price observables.
    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    /// Covariate column names, in input order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The aligned frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Number of aligned rows.
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    /// True when there are no aligned rows.
    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Encoded positions held by index column `column`, row by row.
    pub fn positions(&self, column: &str) -> Result<Vec<usize>, WrapperError> {
        let positions = self.frame.column(column)?.u64()?;

        positions
            .into_iter()
            .map(|position| {
                position
                    .map(|x| x as usize)
                    .ok_or_else(|| WrapperError::ShapeMismatch {
                        what: self.key.clone(),
                        detail: format!("index column {} has an empty row", column),
                    })
            })
            .collect()
    }

    /// Covariates as a (rows x covariates) matrix, `NaN` where missing.
    pub fn values(&self) -> Result<Array2<f64>, WrapperError> {
        let columns = self
            .columns
            .iter()
            .map(|name| -> Result<Vec<f64>, WrapperError> {
                let values = self.frame.column(name)?.f64()?;
                Ok(values.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Array2::from_shape_fn(
            (self.frame.height(), columns.len()),
            |(row, column)| columns[column][row],
        ))
    }
}

fn identifier<'a>(
    observable: &Observable,
    encoders: &'a Encoders,
) -> Result<&'a EncodedColumn, WrapperError> {
    let what = format!("{} observable {}", observable.kind, observable.name);

    match observable.kind {
        EntityKind::Item => Ok(encoders.item()),
        EntityKind::User => encoders.require_user(&what),
        EntityKind::Session | EntityKind::Price => encoders.require_session(&what),
    }
}

/// Read the covariate columns: everything except `index_columns`.
fn covariates(
    table: &Table,
    index_columns: &[&str],
    what: &str,
) -> Result<(Vec<String>, Vec<Vec<f64>>), WrapperError> {
    let names: Vec<String> = table
        .headers()
        .into_iter()
        .filter(|x| !index_columns.contains(&x.as_str()))
        .collect();
    let values = names
        .iter()
        .map(|name| table.numeric(name, what))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((names, values))
}

/// Encoded index columns followed by the covariates.
fn covariate_frame(
    index: Vec<(&str, Vec<u64>)>,
    names: &[String],
    covariates: Vec<Vec<f64>>,
) -> Result<DataFrame, WrapperError> {
    let columns = index
        .into_iter()
        .map(|(name, positions)| Column::new(name.into(), positions))
        .chain(
            names
                .iter()
                .zip(covariates)
                .map(|(name, values)| Column::new(name.as_str().into(), values)),
        )
        .collect();

    Ok(DataFrame::new(columns)?)
}

/// Left-join `values` onto every row of `keys`, sorted by the keys.
fn left_join(keys: DataFrame, values: DataFrame, on: &[&str]) -> Result<DataFrame, WrapperError> {
    let on: Vec<Expr> = on.iter().map(|&x| col(x)).collect();

    let joined = keys
        .lazy()
        .join(values.lazy(), on.clone(), on.clone(), JoinArgs::new(JoinType::Left))
        .sort_by_exprs(on, SortMultipleOptions::default())
        .collect()?;

    Ok(joined)
}

fn unknown_label(what: &str, label: &Label, encoder: &EncodedColumn) -> WrapperError {
    WrapperError::KeyNotFound {
        scope: format!("the {} encoder (referenced by {})", encoder.encoder().name(), what),
        label: label.clone(),
    }
}

/// Reorder an item, user or session observable to encoder order.
///
/// Every encoded label needs exactly one row, and every row must refer to
/// a label seen in the main table.
fn align_entity(
    observable: &Observable,
    encoded: &EncodedColumn,
) -> Result<AlignedObservable, WrapperError> {
    let key = observable.key();
    let what = format!("observable {}", key);
    let table = observable.table();
    let encoder = encoded.encoder();
    let column = encoded.column();

    let labels = table.labels(column, &what)?;
    let (columns, covariates) = covariates(table, &[column], &what)?;

    let mut seen = vec![false; encoder.len()];
    let mut positions = Vec::with_capacity(labels.len());

    for label in &labels {
        let idx = encoder
            .index_of(label)
            .map_err(|_| unknown_label(&what, label, encoded))?;

        if seen[idx] {
            return Err(WrapperError::DuplicateIndex {
                observable: key,
                index: label.to_string(),
            });
        }

        seen[idx] = true;
        positions.push(idx as u64);
    }

    if let Some(idx) = seen.iter().position(|&x| !x) {
        return Err(WrapperError::KeyNotFound {
            scope: what,
            label: encoder.classes()[idx].clone(),
        });
    }

    let keys = DataFrame::new(vec![Column::new(
        column.into(),
        (0..encoder.len() as u64).collect::<Vec<u64>>(),
    )])?;
    let values = covariate_frame(vec![(column, positions)], &columns, covariates)?;

    Ok(AlignedObservable {
        key: key,
        kind: observable.kind(),
        index_columns: vec![column.to_owned()],
        columns: columns,
        frame: left_join(keys, values, &[column])?,
    })
}

/// Complete a price observable against the full session x item product.
///
/// Pairs missing from the input stay in the result with null covariates:
/// they mark unavailable items or absent information.
fn align_price(
    observable: &Observable,
    sessions: &EncodedColumn,
    items: &EncodedColumn,
) -> Result<AlignedObservable, WrapperError> {
    let key = observable.key();
    let what = format!("observable {}", key);
    let table = observable.table();
    let (session_column, item_column) = (sessions.column(), items.column());

    let session_labels = table.labels(session_column, &what)?;
    let item_labels = table.labels(item_column, &what)?;
    let (columns, covariates) = covariates(table, &[session_column, item_column], &what)?;

    let num_sessions = sessions.encoder().len();
    let num_items = items.encoder().len();
    let mut seen = vec![false; num_sessions * num_items];
    let mut session_positions = Vec::with_capacity(session_labels.len());
    let mut item_positions = Vec::with_capacity(item_labels.len());

    for (session, item) in session_labels.iter().zip(item_labels.iter()) {
        let session_idx = sessions
            .encoder()
            .index_of(session)
            .map_err(|_| unknown_label(&what, session, sessions))?;
        let item_idx = items
            .encoder()
            .index_of(item)
            .map_err(|_| unknown_label(&what, item, items))?;
        let target = session_idx * num_items + item_idx;

        if seen[target] {
            return Err(WrapperError::DuplicateIndex {
                observable: key,
                index: format!("({}, {})", session, item),
            });
        }

        seen[target] = true;
        session_positions.push(session_idx as u64);
        item_positions.push(item_idx as u64);
    }

    let (product_sessions, product_items): (Vec<u64>, Vec<u64>) =
        iproduct!(0..num_sessions as u64, 0..num_items as u64).unzip();
    let keys = DataFrame::new(vec![
        Column::new(session_column.into(), product_sessions),
        Column::new(item_column.into(), product_items),
    ])?;
    let values = covariate_frame(
        vec![(session_column, session_positions), (item_column, item_positions)],
        &columns,
        covariates,
    )?;

    Ok(AlignedObservable {
        key: key,
        kind: EntityKind::Price,
        index_columns: vec![session_column.to_owned(), item_column.to_owned()],
        columns: columns,
        frame: left_join(keys, values, &[session_column, item_column])?,
    })
}

/// Align one observable against the fitted encoders.
pub fn align(observable: &Observable, encoders: &Encoders) -> Result<AlignedObservable, WrapperError> {
    let encoded = identifier(observable, encoders)?;

    let aligned = match observable.kind() {
        EntityKind::Price => align_price(observable, encoded, encoders.item())?,
        _ => align_entity(observable, encoded)?,
    };

    debug!(
        "Aligned {} to {} rows x {} covariates",
        aligned.key,
        aligned.len(),
        aligned.columns.len()
    );

    Ok(aligned)
}
