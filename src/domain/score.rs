use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome of one evaluator invocation.
///
/// A score is either a numeric value in `[0, 1]` or a skip with a reason.
/// Modeled as a sum type so "both value and reason present" is
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScoreValue {
    Scored(f64),
    Skipped(String),
}

impl ScoreValue {
    /// Numeric value for scored results, `None` for skips.
    pub fn value(&self) -> Option<f64> {
        match self {
            ScoreValue::Scored(v) => Some(*v),
            ScoreValue::Skipped(_) => None,
        }
    }

    /// Skip reason, `None` for scored results.
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            ScoreValue::Scored(_) => None,
            ScoreValue::Skipped(reason) => Some(reason.as_str()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ScoreValue::Skipped(_))
    }
}

/// One evaluator score for a trace or a span within a trace.
///
/// Uniqueness: exactly one row per `(run_evaluator_id, trace_id, span_id)`,
/// where a missing `span_id` counts as one well-defined value (two
/// trace-level scores for the same trace+evaluator collapse into one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub id: Uuid,
    pub run_evaluator_id: Uuid,
    pub monitor_id: Uuid,
    pub trace_id: String,
    /// `None` for trace-level scores.
    pub span_id: Option<String>,
    pub value: ScoreValue,
    pub explanation: Option<String>,
    pub trace_timestamp: DateTime<Utc>,
}

/// Evaluation level an evaluator runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorLevel {
    Trace,
    Agent,
    Llm,
}

impl fmt::Display for EvaluatorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorLevel::Trace => write!(f, "trace"),
            EvaluatorLevel::Agent => write!(f, "agent"),
            EvaluatorLevel::Llm => write!(f, "llm"),
        }
    }
}

impl std::str::FromStr for EvaluatorLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(EvaluatorLevel::Trace),
            "agent" => Ok(EvaluatorLevel::Agent),
            "llm" => Ok(EvaluatorLevel::Llm),
            _ => anyhow::bail!(
                "Invalid evaluator level: {}. Must be 'trace', 'agent' or 'llm'",
                s
            ),
        }
    }
}

/// An evaluator instance attached to one monitor run.
///
/// Owned by the external monitor lifecycle; this engine only upserts rows
/// when a run starts and reads them to resolve evaluators by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRunEvaluator {
    pub id: Uuid,
    pub monitor_run_id: Uuid,
    pub monitor_id: Uuid,
    pub evaluator_name: String,
    pub display_name: String,
    pub level: EvaluatorLevel,
    /// Aggregation names to compute in summaries ("mean", "min", "max").
    /// Empty means the default ("mean").
    pub aggregations: Vec<String>,
}
