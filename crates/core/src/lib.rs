//! certrack core data models.
//!
//! Templates, components, prerequisite edges, sessions, enrollments and
//! progress records, plus the error taxonomy and engine configuration
//! shared by every certrack service.

#![warn(missing_docs)]

mod wire;

// Core identities
mod id;

// Composition
mod template;
mod session;

// Eligibility
mod prerequisite;

// Progress tracking
mod enrollment;

mod config;
mod error;

// Re-exports
pub use id::*;

pub use template::{
    SessionTemplate, TemplateComponent, TemplateWithComponents, TemplateFilter,
    TemplateType, ComponentType, BreakType, AssessmentType, is_strictly_ordered,
};
pub use session::TrainingSession;
pub use prerequisite::{
    CoursePrerequisite, PrerequisiteType, CompletionRecord, StudentHistory,
    Eligibility, MissingRequirement, UnmetReason,
};
pub use enrollment::{
    SessionEnrollment, ComponentProgress, ProgressStatus, AttendanceStatus,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
