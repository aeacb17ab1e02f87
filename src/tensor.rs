//! Dense `f32` arrays from aligned observables.
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};

use super::dataset::ObservableTensor;
use super::encoder::{EncodedColumn, Encoders};
use super::observable::{AlignedObservable, EntityKind};
use super::WrapperError;

/// Fail unless `positions` are exactly `expected`, in order.
pub fn check_order<I>(what: &str, column: &str, positions: &[usize], expected: I) -> Result<(), WrapperError>
where
    I: IntoIterator<Item = usize>,
{
    let expected: Vec<usize> = expected.into_iter().collect();

    if positions != &expected[..] {
        let row = positions
            .iter()
            .zip(&expected)
            .position(|(actual, expected)| actual != expected)
            .unwrap_or_else(|| positions.len().min(expected.len()));

        return Err(WrapperError::ShapeMismatch {
            what: what.to_owned(),
            detail: format!(
                "{} does not follow encoder order at row {} ({} rows, expected {})",
                column,
                row,
                positions.len(),
                expected.len()
            ),
        });
    }

    Ok(())
}

/// Spread a session-major column of the (session x item) product into a
/// (sessions x items) matrix.
pub fn pivot(what: &str, values: Vec<f64>, num_sessions: usize, num_items: usize) -> Result<Array2<f64>, WrapperError> {
    Array2::from_shape_vec((num_sessions, num_items), values).map_err(|err| WrapperError::ShapeMismatch {
        what: what.to_owned(),
        detail: err.to_string(),
    })
}

fn materialize_entity(
    aligned: &AlignedObservable,
    encoded: &EncodedColumn,
) -> Result<ObservableTensor, WrapperError> {
    let positions = aligned.positions(encoded.column())?;
    check_order(aligned.key(), encoded.column(), &positions, 0..encoded.encoder().len())?;

    Ok(ObservableTensor::Entity(aligned.values()?.mapv(|x| x as f32)))
}

/// Pivot every covariate column to (session, item) and stack the
/// matrices along a trailing axis.
fn materialize_price(
    aligned: &AlignedObservable,
    sessions: &EncodedColumn,
    items: &EncodedColumn,
) -> Result<ObservableTensor, WrapperError> {
    let num_sessions = sessions.encoder().len();
    let num_items = items.encoder().len();

    let session_positions = aligned.positions(sessions.column())?;
    let item_positions = aligned.positions(items.column())?;
    check_order(
        aligned.key(),
        sessions.column(),
        &session_positions,
        iproduct!(0..num_sessions, 0..num_items).map(|(session, _)| session),
    )?;
    check_order(
        aligned.key(),
        items.column(),
        &item_positions,
        iproduct!(0..num_sessions, 0..num_items).map(|(_, item)| item),
    )?;

    let values = aligned.values()?;
    let mut slices: Vec<Array2<f32>> = Vec::with_capacity(aligned.columns().len());

    for (column, values) in aligned.columns().iter().zip(values.axis_iter(Axis(1))) {
        let what = format!("{} column {}", aligned.key(), column);
        let matrix = pivot(&what, values.to_vec(), num_sessions, num_items)?;

        slices.push(matrix.mapv(|x| x as f32));
    }

    if slices.is_empty() {
        return Ok(ObservableTensor::Price(Array3::zeros((num_sessions, num_items, 0))));
    }

    let views: Vec<ArrayView2<f32>> = slices.iter().map(|x| x.view()).collect();
    let tensor = stack(Axis(2), &views).map_err(|err| WrapperError::ShapeMismatch {
        what: aligned.key().to_owned(),
        detail: err.to_string(),
    })?;

    Ok(ObservableTensor::Price(tensor))
}

/// Turn an aligned observable into its dense tensor, keyed by its
/// namespaced name.
pub fn materialize(
    aligned: &AlignedObservable,
    encoders: &Encoders,
) -> Result<(String, ObservableTensor), WrapperError> {
    let what = format!("{} observable {}", aligned.kind(), aligned.key());

    let tensor = match aligned.kind() {
        EntityKind::Item => materialize_entity(aligned, encoders.item())?,
        EntityKind::User => materialize_entity(aligned, encoders.require_user(&what)?)?,
        EntityKind::Session => materialize_entity(aligned, encoders.require_session(&what)?)?,
        EntityKind::Price => {
            materialize_price(aligned, encoders.require_session(&what)?, encoders.item())?
        }
    };

    debug!("Materialized {} with shape {:?}", aligned.key(), tensor.shape());

    Ok((aligned.key().to_owned(), tensor))
}
