//! Building a [`ChoiceDataset`] from long-format purchase records.
//!
//! The main table has one row per candidate item per purchase record.
//! [`ChoiceConfig`] names its columns and lists the covariate tables;
//! [`ChoiceConfig::build`] encodes identifiers, aligns and materializes
//! the observables, and assembles the dataset.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use ndarray::Array1;
use polars::prelude::{col, Column, DataFrame, DataType, IntoLazy};
use rayon::prelude::*;

use super::availability::item_availability;
use super::data::{Label, Table};
use super::dataset::{ChoiceDataset, DatasetParts};
use super::encoder::{EncodedColumn, Encoders, LabelEncoder};
use super::observable::{align, EntityKind, Observable};
use super::summary::{Summary, TablePreview};
use super::tensor::materialize;
use super::WrapperError;

const MAIN_TABLE: &str = "the main table";

/// Supported layouts of the main table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// One row per (purchase record, candidate item), as exported by Stata.
    Stata,
}

impl Format {
    /// Names accepted by `from_str`.
    pub const SUPPORTED: [&'static str; 1] = ["stata"];
}

impl FromStr for Format {
    type Err = WrapperError;

    fn from_str(value: &str) -> Result<Format, WrapperError> {
        match value {
            "stata" => Ok(Format::Stata),
            other => Err(WrapperError::UnsupportedFormat {
                format: other.to_owned(),
                supported: Format::SUPPORTED.to_vec(),
            }),
        }
    }
}

fn default_format() -> String {
    "stata".to_owned()
}

/// Column names of the main table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Columns {
    /// Identifies the purchase record of each row.
    pub purchase_record: String,
    /// Identifies the candidate item of each row.
    pub item_name: String,
    /// 1 on the chosen row of each purchase record, 0 elsewhere.
    pub choice: String,
    /// Optional user identifier, constant within a purchase record.
    #[serde(default)]
    pub user_index: Option<String>,
    /// Optional session identifier, constant within a purchase record.
    #[serde(default)]
    pub session_index: Option<String>,
}

/// Configuration of a choice dataset build.
///
/// ```rust
/// # extern crate choicedata;
/// # use choicedata::{ChoiceConfig, Table};
/// let brands = Table::from_csv_str("item,premium\nA,1\nB,0\n").unwrap();
///
/// let config = ChoiceConfig::new("record", "item", "chosen")
///     .user_index_column("user")
///     .item_observable("brand", brands)
///     .format("stata");
///
/// assert_eq!(config.observables()[0].key(), "item_brand");
/// ```
#[derive(Clone, Debug)]
pub struct ChoiceConfig {
    columns: Columns,
    format: String,
    observables: Vec<Observable>,
}

impl ChoiceConfig {
    /// Start a configuration from the three required columns.
    pub fn new<S: Into<String>>(purchase_record_column: S, item_name_column: S, choice_column: S) -> Self {
        ChoiceConfig::from_columns(Columns {
            purchase_record: purchase_record_column.into(),
            item_name: item_name_column.into(),
            choice: choice_column.into(),
            user_index: None,
            session_index: None,
        })
    }

    /// Start a configuration from a full set of column names.
    pub fn from_columns(columns: Columns) -> Self {
        ChoiceConfig {
            columns: columns,
            format: default_format(),
            observables: Vec::new(),
        }
    }

    /// Index users by `column` of the main table.
    pub fn user_index_column<S: Into<String>>(mut self, column: S) -> Self {
        self.columns.user_index = Some(column.into());
        self
    }

    /// Index sessions by `column` of the main table.
    pub fn session_index_column<S: Into<String>>(mut self, column: S) -> Self {
        self.columns.session_index = Some(column.into());
        self
    }

    /// Input format; only `stata` is implemented.
    pub fn format<S: Into<String>>(mut self, format: S) -> Self {
        self.format = format.into();
        self
    }

    /// Append an observable. Keys follow insertion order.
    pub fn observable(mut self, observable: Observable) -> Self {
        self.observables.push(observable);
        self
    }

    /// Covariates indexed by the item-name column.
    pub fn item_observable<S: Into<String>>(self, name: S, table: Table) -> Self {
        self.observable(Observable::new(EntityKind::Item, name, table))
    }

    /// Covariates indexed by the user column.
    pub fn user_observable<S: Into<String>>(self, name: S, table: Table) -> Self {
        self.observable(Observable::new(EntityKind::User, name, table))
    }

    /// Covariates indexed by the session column.
    pub fn session_observable<S: Into<String>>(self, name: S, table: Table) -> Self {
        self.observable(Observable::new(EntityKind::Session, name, table))
    }

    /// Covariates indexed by the session and item-name columns.
    pub fn price_observable<S: Into<String>>(self, name: S, table: Table) -> Self {
        self.observable(Observable::new(EntityKind::Price, name, table))
    }

    /// Column names of the main table.
    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    /// Observables in insertion order.
    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    /// Checks that need no data: the format, the identifier columns every
    /// observable depends on, and unique observable keys.
    pub fn validate(&self) -> Result<Format, WrapperError> {
        let format = self.format.parse::<Format>()?;
        let mut keys = HashSet::new();

        for observable in &self.observables {
            let missing = match observable.kind() {
                EntityKind::Item => None,
                EntityKind::User if self.columns.user_index.is_none() => Some("user"),
                EntityKind::Session | EntityKind::Price if self.columns.session_index.is_none() => {
                    Some("session")
                }
                _ => None,
            };

            if let Some(column) = missing {
                return Err(WrapperError::MissingIdentifier {
                    what: format!("{} observable {}", observable.kind(), observable.name()),
                    column: column,
                });
            }

            if !keys.insert(observable.key()) {
                return Err(WrapperError::DuplicateObservable {
                    key: observable.key(),
                });
            }
        }

        Ok(format)
    }

    /// Run the whole pipeline over `main`.
    pub fn build(self, main: Table) -> Result<ChoiceDataWrapper, WrapperError> {
        let format = self.validate()?;

        info!("Creating choice dataset from {:?} format data", format);

        let encoders = Encoders::fit(
            &main,
            &self.columns.item_name,
            self.columns.user_index.as_ref().map(|x| x.as_str()),
            self.columns.session_index.as_ref().map(|x| x.as_str()),
        )?;

        let observables = self
            .observables
            .par_iter()
            .map(|observable| {
                let aligned = align(observable, &encoders)?;
                materialize(&aligned, &encoders)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = PurchaseRecords::group(&main, &self.columns.purchase_record)?;

        let items = main.labels(&self.columns.item_name, MAIN_TABLE)?;
        let item_positions = encoders.item().encoder().transform(&items)?;
        let choice_set_sizes = records.choice_set_sizes(&item_positions)?;

        let item_availability = if choice_set_sizes.len() > 1 {
            info!(
                "Choice sets of different sizes found in different purchase records: {:?}",
                choice_set_sizes
            );
            Some(item_availability(&main, &self.columns.choice, &encoders)?)
        } else {
            None
        };

        let choices = main.numeric(&self.columns.choice, MAIN_TABLE)?;
        let item_index = records.chosen_items(&item_positions, &choices)?;

        let user_index = match encoders.user() {
            Some(encoded) => Some(records.encode_constant(&main, encoded)?),
            None => None,
        };
        let session_index = match encoders.session() {
            Some(encoded) => Some(records.encode_constant(&main, encoded)?),
            None => None,
        };

        let dataset = ChoiceDataset::new(DatasetParts {
            num_items: encoders.item().encoder().len(),
            num_users: encoders.user().map(|x| x.encoder().len()),
            num_sessions: encoders.session().map(|x| x.encoder().len()),
            item_index: item_index,
            user_index: user_index,
            session_index: session_index,
            item_availability: item_availability,
            observables: observables,
        })?;

        info!("Built {}", dataset);

        Ok(ChoiceDataWrapper {
            main: main,
            columns: self.columns,
            format: format,
            encoders: encoders,
            purchase_records: records.labels,
            choice_set_sizes: choice_set_sizes,
            dataset: dataset,
        })
    }
}

/// Rows of the main table grouped by purchase record, in order of
/// first appearance.
struct PurchaseRecords {
    labels: Vec<Label>,
    rows: Vec<Vec<usize>>,
}

impl PurchaseRecords {
    fn group(table: &Table, column: &str) -> Result<PurchaseRecords, WrapperError> {
        let mut positions: HashMap<Label, usize> = HashMap::new();
        let mut labels = Vec::new();
        let mut rows: Vec<Vec<usize>> = Vec::new();

        for (row, label) in table.labels(column, MAIN_TABLE)?.into_iter().enumerate() {
            let next = labels.len();
            let position = *positions.entry(label.clone()).or_insert(next);

            if position == next {
                labels.push(label);
                rows.push(Vec::new());
            }

            rows[position].push(row);
        }

        Ok(PurchaseRecords {
            labels: labels,
            rows: rows,
        })
    }

    /// Number of distinct items offered -> number of records.
    fn choice_set_sizes(&self, items: &[usize]) -> Result<BTreeMap<usize, usize>, WrapperError> {
        let mut records = vec![0u64; items.len()];

        for (record, rows) in self.rows.iter().enumerate() {
            for &row in rows {
                records[row] = record as u64;
            }
        }

        let frame = DataFrame::new(vec![
            Column::new("record".into(), records),
            Column::new("item".into(), items.iter().map(|&x| x as u64).collect::<Vec<u64>>()),
        ])?;
        let per_record = frame
            .lazy()
            .group_by_stable([col("record")])
            .agg([col("item").n_unique().alias("size")])
            .collect()?;
        let per_record = per_record.column("size")?.cast(&DataType::UInt64)?;

        let mut sizes = BTreeMap::new();

        for size in per_record.u64()?.into_iter().flatten() {
            *sizes.entry(size as usize).or_insert(0) += 1;
        }

        Ok(sizes)
    }

    /// The encoded item of the single row flagged as chosen in each record.
    fn chosen_items(&self, items: &[usize], choices: &[f64]) -> Result<Array1<usize>, WrapperError> {
        let mut chosen = Vec::with_capacity(self.labels.len());

        for (record, rows) in self.labels.iter().zip(&self.rows) {
            let bought: Vec<usize> = rows.iter().cloned().filter(|&row| choices[row] == 1.0).collect();

            if bought.len() != 1 {
                return Err(WrapperError::MalformedRecord {
                    record: record.clone(),
                    reason: format!("{} rows flagged as chosen, expected exactly one", bought.len()),
                });
            }

            chosen.push(items[bought[0]]);
        }

        Ok(Array1::from(chosen))
    }

    /// Encode a column that must hold one value per record.
    fn encode_constant(&self, table: &Table, encoded: &EncodedColumn) -> Result<Array1<usize>, WrapperError> {
        let values = table.labels(encoded.column(), MAIN_TABLE)?;
        let mut indices = Vec::with_capacity(self.labels.len());

        for (record, rows) in self.labels.iter().zip(&self.rows) {
            let first = &values[rows[0]];

            if let Some(&row) = rows.iter().find(|&&row| &values[row] != first) {
                return Err(WrapperError::MalformedRecord {
                    record: record.clone(),
                    reason: format!(
                        "{} takes values {} and {} within the record",
                        encoded.column(),
                        first,
                        values[row]
                    ),
                });
            }

            indices.push(encoded.encoder().index_of(first)?);
        }

        Ok(Array1::from(indices))
    }
}

/// Long-format purchase records together with the dataset built from them.
///
/// Everything is derived once in [`ChoiceConfig::build`] and never
/// changes afterwards.
#[derive(Clone, Debug)]
pub struct ChoiceDataWrapper {
    main: Table,
    columns: Columns,
    format: Format,
    encoders: Encoders,
    purchase_records: Vec<Label>,
    choice_set_sizes: BTreeMap<usize, usize>,
    dataset: ChoiceDataset,
}

impl ChoiceDataWrapper {
    /// Number of purchase records.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// True when there are no purchase records.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// The long-format input.
    pub fn main_table(&self) -> &Table {
        &self.main
    }

    /// Column names of the main table.
    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    /// Layout of the main table.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Item names in encoded order.
    pub fn item_encoder(&self) -> &LabelEncoder {
        self.encoders.item().encoder()
    }

    /// The user encoder, if users are indexed.
    pub fn user_encoder(&self) -> Option<&LabelEncoder> {
        self.encoders.user().map(|x| x.encoder())
    }

    /// The session encoder, if sessions are indexed.
    pub fn session_encoder(&self) -> Option<&LabelEncoder> {
        self.encoders.session().map(|x| x.encoder())
    }

    /// Purchase record identifiers in dataset order.
    pub fn purchase_records(&self) -> &[Label] {
        &self.purchase_records
    }

    /// Choice-set size -> number of purchase records.
    pub fn choice_set_sizes(&self) -> &BTreeMap<usize, usize> {
        &self.choice_set_sizes
    }

    /// The assembled dataset.
    pub fn dataset(&self) -> &ChoiceDataset {
        &self.dataset
    }

    /// Give up the wrapper and keep the dataset.
    pub fn into_dataset(self) -> ChoiceDataset {
        self.dataset
    }

    /// Report the item vocabulary, record count and array shapes, with
    /// the first `preview_rows` rows of the main table.
    pub fn summary(&self, preview_rows: usize) -> Result<Summary, WrapperError> {
        Ok(Summary {
            items: self.item_encoder().classes().to_vec(),
            num_records: self.len(),
            choice_set_sizes: self.choice_set_sizes.clone(),
            main_preview: TablePreview::new(&self.main, preview_rows)?,
            dataset_shapes: self.dataset.shapes(),
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use ndarray::arr2;

    fn two_records() -> Table {
        Table::from_csv_str(
            "record,item,chosen,session,user\n\
             1,A,1,s1,u1\n\
             1,B,0,s1,u1\n\
             2,B,0,s2,u2\n\
             2,C,1,s2,u2\n",
        )
        .unwrap()
    }

    fn ragged_records() -> Table {
        Table::from_csv_str(
            "record,item,chosen,session\n\
             10,A,1,s1\n\
             10,B,0,s1\n\
             7,B,0,s2\n\
             7,C,0,s2\n\
             7,D,1,s2\n",
        )
        .unwrap()
    }

    #[test]
    fn two_records_scenario() {
        let wrapper = ChoiceConfig::new("record", "item", "chosen")
            .session_index_column("session")
            .build(two_records())
            .unwrap();

        assert_eq!(wrapper.len(), 2);
        assert_eq!(
            wrapper.item_encoder().classes(),
            &[Label::from("A"), Label::from("B"), Label::from("C")]
        );
        assert_eq!(wrapper.dataset().item_index().to_vec(), vec![0, 2]);
        assert_eq!(wrapper.dataset().session_index().unwrap().to_vec(), vec![0, 1]);
        assert!(wrapper.dataset().user_index().is_none());
        // Both records offer two items.
        assert!(wrapper.dataset().item_availability().is_none());
    }

    #[test]
    fn varying_choice_sets_get_availability() {
        let wrapper = ChoiceConfig::new("record", "item", "chosen")
            .session_index_column("session")
            .build(ragged_records())
            .unwrap();

        assert_eq!(wrapper.purchase_records(), &[Label::from(10), Label::from(7)]);
        assert_eq!(wrapper.dataset().item_index().to_vec(), vec![0, 3]);

        let mut sizes = BTreeMap::new();
        sizes.insert(2, 1);
        sizes.insert(3, 1);
        assert_eq!(wrapper.choice_set_sizes(), &sizes);

        assert_eq!(
            wrapper.dataset().item_availability().unwrap(),
            &arr2(&[[true, true, false, false], [false, true, true, true]])
        );
    }

    #[test]
    fn varying_choice_sets_need_sessions() {
        match ChoiceConfig::new("record", "item", "chosen").build(ragged_records()) {
            Err(WrapperError::MissingIdentifier { column, .. }) => assert_eq!(column, "session"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn users_and_observables() {
        let brands = Table::from_csv_str("item,premium,age\nC,1,3\nB,0,2\nA,1,1\n").unwrap();
        let ages = Table::from_csv_str("user,age\nu2,40\nu1,30\n").unwrap();
        let weekdays = Table::from_csv_str("session,weekday\ns1,1\ns2,5\n").unwrap();
        let prices = Table::from_csv_str(
            "session,item,price\n\
             s1,A,1.5\n\
             s1,B,2.0\n\
             s2,B,2.5\n\
             s2,C,3.0\n",
        )
        .unwrap();

        let wrapper = ChoiceConfig::new("record", "item", "chosen")
            .user_index_column("user")
            .session_index_column("session")
            .item_observable("brand", brands)
            .user_observable("age", ages)
            .session_observable("weekday", weekdays)
            .price_observable("price", prices)
            .build(two_records())
            .unwrap();
        let dataset = wrapper.dataset();

        assert_eq!(dataset.user_index().unwrap().to_vec(), vec![0, 1]);
        assert_eq!(
            dataset.observable("item_brand").unwrap().as_entity().unwrap(),
            &arr2(&[[1.0f32, 1.0], [0.0, 2.0], [1.0, 3.0]])
        );
        assert_eq!(
            dataset.observable("user_age").unwrap().as_entity().unwrap(),
            &arr2(&[[30.0f32], [40.0]])
        );
        assert_eq!(dataset.observable("session_weekday").unwrap().shape(), &[2, 1]);

        let price = dataset.observable("price_price").unwrap().as_price().unwrap();
        assert_eq!(price.shape(), &[2, 3, 1]);
        assert_eq!(price[[0, 0, 0]], 1.5);
        assert_eq!(price[[1, 1, 0]], 2.5);
        assert!(price[[0, 2, 0]].is_nan());
        assert!(price[[1, 0, 0]].is_nan());
    }

    #[test]
    fn unsupported_format() {
        let result = ChoiceConfig::new("record", "item", "chosen")
            .format("csv")
            .build(two_records());

        match result {
            Err(WrapperError::UnsupportedFormat { format, supported }) => {
                assert_eq!(format, "csv");
                assert_eq!(supported, vec!["stata"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn observables_are_validated_eagerly() {
        let ages = Table::from_csv_str("user,age\nu1,30\n").unwrap();
        let config = ChoiceConfig::new("record", "item", "chosen").user_observable("age", ages);

        match config.validate() {
            Err(WrapperError::MissingIdentifier { what, column }) => {
                assert_eq!(what, "user observable age");
                assert_eq!(column, "user");
            }
            other => panic!("unexpected {:?}", other),
        }

        let config = ChoiceConfig::new("record", "item", "chosen")
            .item_observable("brand", Table::from_csv_str("item\n").unwrap())
            .item_observable("brand", Table::from_csv_str("item\n").unwrap());

        match config.validate() {
            Err(WrapperError::DuplicateObservable { key }) => assert_eq!(key, "item_brand"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn exactly_one_choice_per_record() {
        let none_chosen = Table::from_csv_str("record,item,chosen\n1,A,0\n1,B,0\n").unwrap();
        let two_chosen = Table::from_csv_str("record,item,chosen\n1,A,1\n1,B,1\n").unwrap();

        for table in vec![none_chosen, two_chosen] {
            match ChoiceConfig::new("record", "item", "chosen").build(table) {
                Err(WrapperError::MalformedRecord { record, .. }) => assert_eq!(record, Label::from(1)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn users_must_be_constant_within_records() {
        let table = Table::from_csv_str("record,item,chosen,user\n1,A,1,u1\n1,B,0,u2\n").unwrap();

        match ChoiceConfig::new("record", "item", "chosen")
            .user_index_column("user")
            .build(table)
        {
            Err(WrapperError::MalformedRecord { reason, .. }) => {
                assert_eq!(reason, "user takes values u1 and u2 within the record")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sessions_must_be_constant_within_records() {
        let table = Table::from_csv_str(
            "record,item,chosen,session\n\
             1,A,1,s1\n\
             1,B,0,s1\n\
             2,A,0,s1\n\
             2,B,1,s2\n",
        )
        .unwrap();

        match ChoiceConfig::new("record", "item", "chosen")
            .session_index_column("session")
            .build(table)
        {
            Err(WrapperError::MalformedRecord { record, reason }) => {
                assert_eq!(record, Label::from(2));
                assert_eq!(reason, "session takes values s1 and s2 within the record");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn long_integer_item_ids_stay_distinct() {
        let table = Table::from_csv_str(
            "record,item,chosen\n\
             1,18446744073709551610,1\n\
             1,18446744073709551611,0\n\
             2,18446744073709551610,0\n\
             2,18446744073709551611,1\n",
        )
        .unwrap();

        let wrapper = ChoiceConfig::new("record", "item", "chosen").build(table).unwrap();

        assert_eq!(
            wrapper.item_encoder().classes(),
            &[
                Label::from("18446744073709551610"),
                Label::from("18446744073709551611"),
            ]
        );
        assert_eq!(wrapper.dataset().item_index().to_vec(), vec![0, 1]);
    }

    #[test]
    fn float_item_names_encode_numerically() {
        let table = Table::from_csv_str(
            "record,item,chosen\n\
             1,1.5,0\n\
             1,10.25,1\n\
             2,2.5,1\n\
             2,10.25,0\n",
        )
        .unwrap();

        let wrapper = ChoiceConfig::new("record", "item", "chosen").build(table).unwrap();

        assert_eq!(
            wrapper.item_encoder().classes(),
            &[Label::from(1.5), Label::from(2.5), Label::from(10.25)]
        );
        assert_eq!(wrapper.dataset().item_index().to_vec(), vec![2, 1]);
    }

    #[test]
    fn summary_reports_the_build() {
        let wrapper = ChoiceConfig::new("record", "item", "chosen")
            .session_index_column("session")
            .build(ragged_records())
            .unwrap();

        let summary = wrapper.summary(3).unwrap();

        assert_eq!(summary.num_records, 2);
        assert_eq!(summary.items.len(), 4);
        assert_eq!(summary.main_preview.rows.len(), 3);
        assert_eq!(summary.dataset_shapes["item_availability"], vec![2, 4]);
        assert!(summary.to_string().contains("* Number of purchase records/cases: 2."));
    }

    #[test]
    fn columns_from_json_like_config() {
        let columns = Columns {
            purchase_record: "record".to_owned(),
            item_name: "item".to_owned(),
            choice: "chosen".to_owned(),
            user_index: Some("user".to_owned()),
            session_index: None,
        };

        let wrapper = ChoiceConfig::from_columns(columns).build(two_records()).unwrap();

        assert_eq!(wrapper.format(), Format::Stata);
        assert_eq!(wrapper.user_encoder().unwrap().len(), 2);
        assert!(wrapper.session_encoder().is_none());
    }
}
