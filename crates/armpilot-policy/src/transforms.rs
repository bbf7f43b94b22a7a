//! SO-100 output transform applied to every reply before it is cached.

use armpilot_types::{ActionVector, PilotError};

/// Keep the first `dim` columns of every action row.
///
/// Models trained with a wider action space pad their output; the arm only
/// consumes the leading `dim` entries.
///
/// # Errors
///
/// Returns [`PilotError::Inference`] when a row is narrower than `dim`.
pub fn trim_actions(rows: Vec<ActionVector>, dim: usize) -> Result<Vec<ActionVector>, PilotError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            if row.len() < dim {
                return Err(PilotError::Inference(format!(
                    "action row {i} has {} values, expected at least {dim}",
                    row.len()
                )));
            }
            row.truncate(dim);
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_leading_columns() {
        let rows = vec![(0..32).map(|v| v as f32).collect::<Vec<_>>(); 2];
        let trimmed = trim_actions(rows, 6).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[1], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn trim_rejects_narrow_rows() {
        let err = trim_actions(vec![vec![0.0; 6], vec![0.0; 4]], 6).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
