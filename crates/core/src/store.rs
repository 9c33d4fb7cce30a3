use crate::models::IndexEntry;
use crate::StoreError;
use std::collections::HashSet;

pub fn ensure_unique_ids(entries: &[IndexEntry]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(StoreError::DuplicateId(entry.id.clone()));
        }
    }
    Ok(())
}

/// Checks every vector against `expected`, or against the first vector when the
/// index has no dimension yet. Returns the dimension the batch agrees on.
pub fn ensure_dimension(
    expected: Option<usize>,
    entries: &[IndexEntry],
) -> Result<Option<usize>, StoreError> {
    let mut dimension = expected;
    for entry in entries {
        match dimension {
            Some(expected) if entry.vector.len() != expected => {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: entry.vector.len(),
                });
            }
            Some(_) => {}
            None => dimension = Some(entry.vector.len()),
        }
    }
    Ok(dimension)
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left
        .iter()
        .zip(right)
        .map(|(left, right)| left * right)
        .sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}
