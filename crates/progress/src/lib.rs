//! Enrollment & Progress
//!
//! Session instantiation, the per-component status machine, and completion
//! statistics.

pub mod aggregator;
pub mod engine;
pub mod transition;

pub use aggregator::{CompletionAggregator, CompletionRate, EnrollmentSummary, SessionStats, TemplateUsage};
pub use engine::{Enrolled, ProgressEngine, SessionSpec};
pub use transition::ProgressNotes;
