//! Rule evaluation: the deterministic engine that turns a ruleset snapshot plus a user into
//! gate/config/layer results.
mod comparisons;
pub mod evaluation_types;
mod evaluator;

pub use evaluator::Evaluator;
