//! Which items were offered in which session.
use ndarray::Array2;

use super::data::Table;
use super::encoder::Encoders;
use super::WrapperError;

/// Build the (sessions x items) availability mask from the main table.
///
/// Entry `(s, i)` is true iff item `i` has a row with a non-missing choice
/// flag in at least one purchase record of session `s`. Requires the
/// session column.
pub fn item_availability(
    table: &Table,
    choice_column: &str,
    encoders: &Encoders,
) -> Result<Array2<bool>, WrapperError> {
    let sessions = encoders.require_session("item availability")?;
    let items = encoders.item();

    let session_labels = table.labels(sessions.column(), "the main table")?;
    let item_labels = table.labels(items.column(), "the main table")?;
    let choices = table.numeric(choice_column, "the main table")?;

    let mut availability = Array2::from_elem((sessions.encoder().len(), items.encoder().len()), false);

    for (session, item, choice) in izip!(&session_labels, &item_labels, &choices) {
        if choice.is_nan() {
            continue;
        }

        let position = [
            sessions.encoder().index_of(session)?,
            items.encoder().index_of(item)?,
        ];
        availability[position] = true;
    }

    Ok(availability)
}
