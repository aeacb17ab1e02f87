//! Dense integer encodings for categorical identifiers.
use std::collections::HashMap;

use itertools::Itertools;

use super::data::{Label, Table};
use super::WrapperError;

/// Maps raw labels to `0..k` in sorted unique label order.
///
/// The ordering is part of the contract: row `k` of every aligned
/// observable tensor corresponds to `classes()[k]`.
#[derive(Clone, Debug)]
pub struct LabelEncoder {
    name: String,
    classes: Vec<Label>,
    index: HashMap<Label, usize>,
}

impl LabelEncoder {
    /// Fit an encoder on a sequence of labels. Repeats are collapsed.
    pub fn fit<I, S>(name: S, labels: I) -> Self
    where
        I: IntoIterator<Item = Label>,
        S: Into<String>,
    {
        let classes: Vec<Label> = labels.into_iter().sorted().dedup().collect();
        let index = classes
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.clone(), idx))
            .collect();

        LabelEncoder {
            name: name.into(),
            classes: classes,
            index: index,
        }
    }

    /// Name used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Labels in encoded order.
    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no label was seen.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Encode one label.
    pub fn index_of(&self, label: &Label) -> Result<usize, WrapperError> {
        self.index
            .get(label)
            .cloned()
            .ok_or_else(|| WrapperError::KeyNotFound {
                scope: format!("the {} encoder", self.name),
                label: label.clone(),
            })
    }

    /// Encode a sequence of labels, failing on the first unseen one.
    pub fn transform<'a, I>(&self, labels: I) -> Result<Vec<usize>, WrapperError>
    where
        I: IntoIterator<Item = &'a Label>,
    {
        labels.into_iter().map(|x| self.index_of(x)).collect()
    }

    /// Decode one index.
    pub fn label(&self, index: usize) -> Result<&Label, WrapperError> {
        self.classes
            .get(index)
            .ok_or_else(|| WrapperError::IndexOutOfRange {
                encoder: self.name.clone(),
                index: index,
                size: self.classes.len(),
            })
    }

    /// Decode a sequence of indices.
    pub fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<Label>, WrapperError> {
        indices
            .iter()
            .map(|&idx| self.label(idx).map(|x| x.clone()))
            .collect()
    }
}

/// An identifier column of the main table together with its encoder.
#[derive(Clone, Debug)]
pub struct EncodedColumn {
    column: String,
    encoder: LabelEncoder,
}

impl EncodedColumn {
    fn fit(table: &Table, column: &str, name: &str) -> Result<Self, WrapperError> {
        let labels = table.distinct_labels(column, "the main table")?;

        Ok(EncodedColumn {
            column: column.to_owned(),
            encoder: LabelEncoder::fit(name, labels),
        })
    }

    /// Name of the column in the main table.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The fitted encoder.
    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }
}

/// The item encoder, and the user and session encoders when
/// those columns were configured.
#[derive(Clone, Debug)]
pub struct Encoders {
    item: EncodedColumn,
    user: Option<EncodedColumn>,
    session: Option<EncodedColumn>,
}

impl Encoders {
    /// Fit every configured identifier column of the main table.
    pub fn fit(
        table: &Table,
        item_column: &str,
        user_column: Option<&str>,
        session_column: Option<&str>,
    ) -> Result<Self, WrapperError> {
        let item = EncodedColumn::fit(table, item_column, "item")?;
        let user = match user_column {
            Some(column) => Some(EncodedColumn::fit(table, column, "user")?),
            None => None,
        };
        let session = match session_column {
            Some(column) => Some(EncodedColumn::fit(table, column, "session")?),
            None => None,
        };

        debug!(
            "Encoded {} items, {:?} users, {:?} sessions",
            item.encoder.len(),
            user.as_ref().map(|x| x.encoder.len()),
            session.as_ref().map(|x| x.encoder.len())
        );

        Ok(Encoders {
            item: item,
            user: user,
            session: session,
        })
    }

    /// The item encoder.
    pub fn item(&self) -> &EncodedColumn {
        &self.item
    }

    /// The user encoder, if a user column was configured.
    pub fn user(&self) -> Option<&EncodedColumn> {
        self.user.as_ref()
    }

    /// The session encoder, if a session column was configured.
    pub fn session(&self) -> Option<&EncodedColumn> {
        self.session.as_ref()
    }

    /// The user encoder, or `MissingIdentifier` naming `what` needed it.
    pub fn require_user(&self, what: &str) -> Result<&EncodedColumn, WrapperError> {
        self.user().ok_or_else(|| WrapperError::MissingIdentifier {
            what: what.to_owned(),
            column: "user",
        })
    }

    /// The session encoder, or `MissingIdentifier` naming `what` needed it.
    pub fn require_session(&self, what: &str) -> Result<&EncodedColumn, WrapperError> {
        self.session().ok_or_else(|| WrapperError::MissingIdentifier {
            what: what.to_owned(),
            column: "session",
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn labels(values: &[&str]) -> Vec<Label> {
        values.iter().map(|&x| Label::from(x)).collect()
    }

    #[test]
    fn sorted_unique_order() {
        let encoder = LabelEncoder::fit("item", labels(&["C", "A", "B", "A", "C"]));

        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.classes(), &labels(&["A", "B", "C"])[..]);
        assert_eq!(
            encoder.transform(&labels(&["B", "C", "A"])).unwrap(),
            vec![1, 2, 0]
        );
    }

    #[test]
    fn integer_labels_order_numerically() {
        let encoder = LabelEncoder::fit("user", vec![Label::from(10), Label::from(2), Label::from(1)]);

        assert_eq!(encoder.index_of(&Label::from(2)).unwrap(), 1);
        assert_eq!(encoder.index_of(&Label::from(10)).unwrap(), 2);
    }

    #[test]
    fn float_labels_order_numerically() {
        let table = Table::from_csv_str("record,item,chosen\n1,1.5,1\n1,10.25,0\n2,2.5,1\n").unwrap();

        let encoders = Encoders::fit(&table, "item", None, None).unwrap();

        assert_eq!(
            encoders.item().encoder().classes(),
            &[Label::from(1.5), Label::from(2.5), Label::from(10.25)]
        );
    }

    #[test]
    fn round_trip() {
        let encoder = LabelEncoder::fit("item", labels(&["z", "x", "y", "w"]));
        let indices: Vec<usize> = (0..encoder.len()).collect();

        let decoded = encoder.inverse_transform(&indices).unwrap();
        assert_eq!(encoder.transform(&decoded).unwrap(), indices);
    }

    #[test]
    fn unseen_label() {
        let encoder = LabelEncoder::fit("session", labels(&["s1", "s2"]));

        match encoder.index_of(&Label::from("s3")) {
            Err(WrapperError::KeyNotFound { scope, label }) => {
                assert_eq!(scope, "the session encoder");
                assert_eq!(label, Label::from("s3"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(encoder.label(2).is_err());
    }

    #[test]
    fn fit_main_table_columns() {
        let table = Table::from_csv_str(
            "record,item,chosen,user\n\
             1,B,1,u2\n\
             1,A,0,u2\n\
             2,C,1,u1\n",
        )
        .unwrap();

        let encoders = Encoders::fit(&table, "item", Some("user"), None).unwrap();

        assert_eq!(encoders.item().column(), "item");
        assert_eq!(encoders.item().encoder().len(), 3);
        assert_eq!(
            encoders.user().unwrap().encoder().classes(),
            &labels(&["u1", "u2"])[..]
        );
        assert!(encoders.session().is_none());

        match encoders.require_session("session observable weekday") {
            Err(WrapperError::MissingIdentifier { column, .. }) => assert_eq!(column, "session"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fit_fails_on_empty_identifier() {
        let table = Table::from_csv_str("record,item,chosen\n1,A,1\n1,,0\n").unwrap();

        assert!(Encoders::fit(&table, "item", None, None).is_err());
        assert!(Encoders::fit(&table, "product", None, None).is_err());
    }
}
