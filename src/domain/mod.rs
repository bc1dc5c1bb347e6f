// Score and evaluator domain types
pub mod score;

// Adaptive granularity classifier
pub mod granularity;

// Derived aggregation shapes
pub mod aggregation;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
