//! The dense choice dataset handed to model trainers.
use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, Array3};

use super::observable::EntityKind;
use super::{ItemId, SessionId, UserId, WrapperError};

/// A dense observable: (entities x covariates) for item, user and session
/// observables, (sessions x items x covariates) for price observables.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservableTensor {
    /// Item, user or session covariates.
    Entity(Array2<f32>),
    /// Session-item covariates.
    Price(Array3<f32>),
}

impl ObservableTensor {
    /// Array shape, leading dimensions first.
    pub fn shape(&self) -> &[usize] {
        match self {
            ObservableTensor::Entity(x) => x.shape(),
            ObservableTensor::Price(x) => x.shape(),
        }
    }

    /// The matrix of an item, user or session observable.
    pub fn as_entity(&self) -> Option<&Array2<f32>> {
        match self {
            ObservableTensor::Entity(x) => Some(x),
            ObservableTensor::Price(_) => None,
        }
    }

    /// The tensor of a price observable.
    pub fn as_price(&self) -> Option<&Array3<f32>> {
        match self {
            ObservableTensor::Price(x) => Some(x),
            ObservableTensor::Entity(_) => None,
        }
    }
}

/// Everything needed to construct a [`ChoiceDataset`].
#[derive(Clone, Debug, Default)]
pub struct DatasetParts {
    /// Number of items.
    pub num_items: usize,
    /// Number of users, when users are indexed.
    pub num_users: Option<usize>,
    /// Number of sessions, when sessions are indexed.
    pub num_sessions: Option<usize>,
    /// The chosen item of every purchase record.
    pub item_index: Array1<ItemId>,
    /// The user of every purchase record.
    pub user_index: Option<Array1<UserId>>,
    /// The session of every purchase record.
    pub session_index: Option<Array1<SessionId>>,
    /// (sessions x items) availability mask.
    pub item_availability: Option<Array2<bool>>,
    /// Observable tensors under namespaced keys.
    pub observables: Vec<(String, ObservableTensor)>,
}

/// Fixed-shape container of the arrays a discrete-choice trainer consumes.
///
/// Construction checks that every array agrees with the declared item,
/// user and session counts.
#[derive(Clone, Debug)]
pub struct ChoiceDataset {
    num_items: usize,
    num_users: Option<usize>,
    num_sessions: Option<usize>,
    item_index: Array1<ItemId>,
    user_index: Option<Array1<UserId>>,
    session_index: Option<Array1<SessionId>>,
    item_availability: Option<Array2<bool>>,
    observables: BTreeMap<String, ObservableTensor>,
}

fn mismatch<S: Into<String>>(what: &str, detail: S) -> WrapperError {
    WrapperError::ShapeMismatch {
        what: what.to_owned(),
        detail: detail.into(),
    }
}

fn check_index(
    what: &str,
    index: &Array1<usize>,
    num_records: usize,
    count: Option<usize>,
) -> Result<(), WrapperError> {
    let count = count.ok_or_else(|| mismatch(what, "index given without an entity count"))?;

    if index.len() != num_records {
        return Err(mismatch(
            what,
            format!("length {} but there are {} purchase records", index.len(), num_records),
        ));
    }

    match index.iter().find(|&&x| x >= count) {
        Some(x) => Err(mismatch(what, format!("index {} out of range for {} entities", x, count))),
        None => Ok(()),
    }
}

impl ChoiceDataset {
    /// Validate the parts against each other and assemble the dataset.
    pub fn new(parts: DatasetParts) -> Result<ChoiceDataset, WrapperError> {
        let num_records = parts.item_index.len();

        check_index("item_index", &parts.item_index, num_records, Some(parts.num_items))?;

        if let Some(ref user_index) = parts.user_index {
            check_index("user_index", user_index, num_records, parts.num_users)?;
        }

        if let Some(ref session_index) = parts.session_index {
            check_index("session_index", session_index, num_records, parts.num_sessions)?;
        }

        if let Some(ref availability) = parts.item_availability {
            let num_sessions = parts
                .num_sessions
                .ok_or_else(|| mismatch("item_availability", "mask given without sessions"))?;

            if availability.dim() != (num_sessions, parts.num_items) {
                return Err(mismatch(
                    "item_availability",
                    format!(
                        "shape {:?}, expected ({}, {})",
                        availability.shape(),
                        num_sessions,
                        parts.num_items
                    ),
                ));
            }
        }

        let mut observables = BTreeMap::new();

        for (key, tensor) in parts.observables {
            let kind = EntityKind::from_key(&key)
                .ok_or_else(|| mismatch(&key, "key has no item_, user_, session_ or price_ prefix"))?;

            let expected: Vec<Option<usize>> = match kind {
                EntityKind::Item => vec![Some(parts.num_items)],
                EntityKind::User => vec![parts.num_users],
                EntityKind::Session => vec![parts.num_sessions],
                EntityKind::Price => vec![parts.num_sessions, Some(parts.num_items)],
            };

            let leading_ok = match (kind, &tensor) {
                (EntityKind::Price, ObservableTensor::Price(_)) => true,
                (EntityKind::Price, ObservableTensor::Entity(_)) => false,
                (_, ObservableTensor::Entity(_)) => true,
                (_, ObservableTensor::Price(_)) => false,
            } && expected
                .iter()
                .zip(tensor.shape())
                .all(|(expected, actual)| *expected == Some(*actual));

            if !leading_ok {
                return Err(mismatch(
                    &key,
                    format!("shape {:?}, expected leading dimensions {:?}", tensor.shape(), expected),
                ));
            }

            if observables.insert(key.clone(), tensor).is_some() {
                return Err(WrapperError::DuplicateObservable { key: key });
            }
        }

        Ok(ChoiceDataset {
            num_items: parts.num_items,
            num_users: parts.num_users,
            num_sessions: parts.num_sessions,
            item_index: parts.item_index,
            user_index: parts.user_index,
            session_index: parts.session_index,
            item_availability: parts.item_availability,
            observables: observables,
        })
    }

    /// Number of purchase records.
    pub fn len(&self) -> usize {
        self.item_index.len()
    }

    /// True when there are no purchase records.
    pub fn is_empty(&self) -> bool {
        self.item_index.is_empty()
    }

    /// Number of encoded items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Number of encoded users, if users are indexed.
    pub fn num_users(&self) -> Option<usize> {
        self.num_users
    }

    /// Number of encoded sessions, if sessions are indexed.
    pub fn num_sessions(&self) -> Option<usize> {
        self.num_sessions
    }

    /// Chosen item per purchase record.
    pub fn item_index(&self) -> &Array1<ItemId> {
        &self.item_index
    }

    /// User per purchase record.
    pub fn user_index(&self) -> Option<&Array1<UserId>> {
        self.user_index.as_ref()
    }

    /// Session per purchase record.
    pub fn session_index(&self) -> Option<&Array1<SessionId>> {
        self.session_index.as_ref()
    }

    /// `None` when every purchase record offers the same number of items.
    pub fn item_availability(&self) -> Option<&Array2<bool>> {
        self.item_availability.as_ref()
    }

    /// Every observable tensor, by key.
    pub fn observables(&self) -> &BTreeMap<String, ObservableTensor> {
        &self.observables
    }

    /// One observable tensor, e.g. `price_price`.
    pub fn observable(&self, key: &str) -> Option<&ObservableTensor> {
        self.observables.get(key)
    }

    /// Shapes of every present array, keyed by field name.
    pub fn shapes(&self) -> BTreeMap<String, Vec<usize>> {
        let mut shapes = BTreeMap::new();

        shapes.insert("item_index".to_owned(), self.item_index.shape().to_vec());

        if let Some(ref x) = self.user_index {
            shapes.insert("user_index".to_owned(), x.shape().to_vec());
        }
        if let Some(ref x) = self.session_index {
            shapes.insert("session_index".to_owned(), x.shape().to_vec());
        }
        if let Some(ref x) = self.item_availability {
            shapes.insert("item_availability".to_owned(), x.shape().to_vec());
        }

        for (key, tensor) in &self.observables {
            shapes.insert(key.clone(), tensor.shape().to_vec());
        }

        shapes
    }
}

impl fmt::Display for ChoiceDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fields: Vec<String> = self
            .shapes()
            .iter()
            .map(|(key, shape)| format!("{}={:?}", key, shape))
            .collect();

        write!(
            f,
            "ChoiceDataset(num_items={}, num_users={:?}, num_sessions={:?}, {})",
            self.num_items,
            self.num_users,
            self.num_sessions,
            fields.join(", ")
        )
    }
}
