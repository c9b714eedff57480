//! Attempt budget resolution.

use thiserror::Error;

/// Requested attempt budget outside the accepted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("max attempts must be between 1 and {limit}, got {requested}")]
pub struct InvalidBudget {
    pub requested: u32,
    pub limit: u32,
}

/// Resolve the attempt budget for a submission.
///
/// `None` falls back to `default`; explicit values must lie in `1..=limit`.
pub fn resolve_max_attempts(
    requested: Option<u32>,
    default: u32,
    limit: u32,
) -> Result<u32, InvalidBudget> {
    let value = requested.unwrap_or(default);
    if value == 0 || value > limit {
        return Err(InvalidBudget {
            requested: value,
            limit,
        });
    }
    Ok(value)
}
