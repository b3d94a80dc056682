//! Prerequisite Graph Validator.
//!
//! Decides whether a student may enroll in a course from the course's
//! prerequisite edges and the student's completion history.

#![warn(missing_docs)]

pub mod validator;
pub mod graph;
pub mod registry;

pub use validator::{PrerequisiteValidator, EvaluationContext, is_within_validity};
pub use graph::PrerequisiteGraph;
pub use registry::PrerequisiteRegistry;
