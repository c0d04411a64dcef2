//! Error taxonomy returned by the flight-plan engine.

use thiserror::Error;

/// Failure modes surfaced by mutating flight-plan operations.
///
/// Storage-level primitives never return these directly; they signal failure
/// with sentinels and leave the plan untouched. The route layer maps those
/// sentinels onto this taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FplnError {
    /// A name, ICAO code or procedure is absent from the navigation database.
    #[error("not found: {0}")]
    NotFound(String),
    /// A snapshot reference is stale, out of range, or points at the active leg.
    #[error("invalid or stale flight-plan reference")]
    InvalidReference,
    /// The requested selection cannot be combined with the current plan,
    /// e.g. a procedure that does not serve the selected runway.
    #[error("incompatible selection: {0}")]
    Incompatible(String),
    /// The leg or segment pool is full; the route cannot grow further.
    #[error("flight plan storage exhausted")]
    Exhausted,
    /// Route file could not be read, written or parsed.
    #[error("route file error: {0}")]
    File(String),
}

impl From<std::io::Error> for FplnError {
    fn from(err: std::io::Error) -> Self {
        FplnError::File(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FplnError>;
