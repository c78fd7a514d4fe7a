//! Trellis Expression
//!
//! Pluggable expression evaluation for workflow graphs.
//!
//! # Architecture
//!
//! ```text
//! dispatch::{validate, evaluate, extract_vars}
//!   - recurse through objects, arrays and strings
//!   - route each string to the evaluator that claims it
//!        │
//!        ▼
//! EvaluatorRegistry
//!   - language name -> Evaluator, in registration order
//!   - registry() is built once per process
//!        │
//!        ▼
//! Evaluator (trait)
//!   - JinjaEvaluator: `{{ _.x }}` via minijinja
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trellis_expression::{dispatch, registry};
//! use serde_json::json;
//!
//! let criteria = json!(["{{ _.count > 1 }}"]);
//! assert!(dispatch::validate(registry(), &criteria).is_empty());
//!
//! let result = dispatch::evaluate(registry(), &criteria, &json!({"count": 2}))?;
//! assert_eq!(result, json!([true]));
//! ```

pub mod dispatch;
mod error;
mod evaluator;
mod jinja;
mod registry;

pub use dispatch::VariableRef;
pub use error::{ExpressionError, ValidationIssue};
pub use evaluator::{Evaluator, is_truthy, var_pattern_for_symbol};
pub use jinja::{DEFAULT_FUEL, JinjaConfig, JinjaEvaluator};
pub use registry::{EvaluatorRegistry, registry};
