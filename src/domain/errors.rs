use crate::domain::granularity::Granularity;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the score store and aggregation pipeline.
///
/// The HTTP boundary maps `NotFound` to 404, `InvalidRange` to 400 and
/// `Persistence` to 500; this engine has no user-facing surface of its own
/// and never retries internally (upserts are idempotent, so retries are
/// safe one layer up).
#[derive(Debug, Error)]
pub enum ScoresError {
    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("invalid time range: end {end} must be after start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("granularity '{0}' cannot be used for time-bucket aggregation")]
    UnsupportedGranularity(Granularity),

    #[error("{context}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },
}

impl ScoresError {
    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        ScoresError::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Wraps a store failure with query context, for use in `map_err`.
    pub fn persistence(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| ScoresError::Persistence {
            context: context.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_formatting() {
        let err = ScoresError::not_found("monitor", "prod-quality");
        assert_eq!(err.to_string(), "monitor not found: prod-quality");
    }

    #[test]
    fn test_invalid_range_formatting() {
        let start = Utc::now();
        let end = start - chrono::Duration::hours(1);
        let msg = ScoresError::InvalidRange { start, end }.to_string();
        assert!(msg.contains("must be after"));
    }

    #[test]
    fn test_unsupported_granularity_formatting() {
        let msg = ScoresError::UnsupportedGranularity(Granularity::Trace).to_string();
        assert!(msg.contains("trace"));
    }
}
