//! Storage trait abstraction.

use async_trait::async_trait;
use certrack_core::{
    ComponentId, ComponentProgress, CompletionRecord, CourseId, CoursePrerequisite,
    EngineError, EnrollmentId, PrerequisiteId, ProgressId, SessionEnrollment, SessionId,
    SessionTemplate, StudentHistory, StudentId, TemplateComponent, TemplateFilter, TemplateId,
    TrainingSession,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQL backend error
    #[cfg(feature = "sqlite")]
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write would break an integrity rule enforced by the backend
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency check failed
    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Record id
        id: String,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(_) | StorageError::VersionConflict { .. } => true,
            #[cfg(feature = "sqlite")]
            StorageError::Sql(_) => true,
            _ => false,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => EngineError::NotFound(what),
            StorageError::Conflict(msg) => EngineError::Conflict(msg),
            other => EngineError::Storage {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

/// One atomic change to a template's component set.
///
/// `template` is written alongside the components so the version bump and
/// the order changes land together.
#[derive(Debug, Clone)]
pub struct ComponentChanges {
    /// Template with its bumped version
    pub template: SessionTemplate,

    /// Components to insert or overwrite
    pub upserts: Vec<TemplateComponent>,

    /// Components to remove
    pub removals: Vec<ComponentId>,
}

/// Storage abstraction for certrack data.
///
/// Methods take `&self`: backends synchronize internally so independent
/// enrollments and progress updates can proceed in parallel.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Template operations ===

    /// Save a template (create or update).
    async fn save_template(&self, template: &SessionTemplate) -> Result<()>;

    /// Load a template by ID.
    async fn load_template(&self, id: TemplateId) -> Result<Option<SessionTemplate>>;

    /// List templates matching the filter.
    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<SessionTemplate>>;

    /// Delete a template and every component it owns.
    async fn delete_template(&self, id: TemplateId) -> Result<()>;

    // === Component operations ===

    /// Load a component by ID.
    async fn load_component(&self, id: ComponentId) -> Result<Option<TemplateComponent>>;

    /// Components of a template, sorted by `sequence_order`.
    async fn list_components(&self, template_id: TemplateId) -> Result<Vec<TemplateComponent>>;

    /// Apply a component change set atomically: all of it or none of it.
    async fn write_components(&self, changes: &ComponentChanges) -> Result<()>;

    // === Prerequisite operations ===

    /// Save a prerequisite edge.
    async fn save_prerequisite(&self, edge: &CoursePrerequisite) -> Result<()>;

    /// Delete a prerequisite edge.
    async fn delete_prerequisite(&self, id: PrerequisiteId) -> Result<()>;

    /// Edges gating `course_id`, or every edge when `None`.
    async fn list_prerequisites(&self, course_id: Option<&CourseId>) -> Result<Vec<CoursePrerequisite>>;

    // === Session operations ===

    /// Save a session.
    async fn save_session(&self, session: &TrainingSession) -> Result<()>;

    /// Load a session by ID.
    async fn load_session(&self, id: SessionId) -> Result<Option<TrainingSession>>;

    /// Sessions built from a template, or every session when `None`.
    async fn list_sessions(&self, template_id: Option<TemplateId>) -> Result<Vec<TrainingSession>>;

    // === Enrollment operations ===

    /// Create an enrollment and all of its progress rows atomically.
    ///
    /// Fails with [`StorageError::Conflict`] if the student is already
    /// enrolled in the session or the session already holds `capacity`
    /// enrollments.
    async fn create_enrollment(
        &self,
        enrollment: &SessionEnrollment,
        progress: &[ComponentProgress],
        capacity: Option<u32>,
    ) -> Result<()>;

    /// Load an enrollment by ID.
    async fn load_enrollment(&self, id: EnrollmentId) -> Result<Option<SessionEnrollment>>;

    /// Enrollments of a session.
    async fn list_enrollments(&self, session_id: SessionId) -> Result<Vec<SessionEnrollment>>;

    // === Progress operations ===

    /// Load a progress record by ID.
    async fn load_progress(&self, id: ProgressId) -> Result<Option<ComponentProgress>>;

    /// Progress records of an enrollment.
    async fn list_progress(&self, enrollment_id: EnrollmentId) -> Result<Vec<ComponentProgress>>;

    /// Overwrite a progress record if the stored version equals `expected_version`.
    async fn update_progress(&self, progress: &ComponentProgress, expected_version: u64) -> Result<()>;

    /// Number of progress records referencing a component.
    async fn count_progress_for_component(&self, component_id: ComponentId) -> Result<usize>;
}

/// Source of student completion history.
#[async_trait]
pub trait CompletionHistory: Send + Sync {
    /// Current history of a student (empty when unknown).
    async fn history(&self, student_id: &StudentId) -> Result<StudentHistory>;

    /// Append a completion record.
    async fn record_completion(&self, student_id: &StudentId, record: CompletionRecord) -> Result<()>;

    /// Add a free-text qualification.
    async fn add_qualification(&self, student_id: &StudentId, qualification: &str) -> Result<()>;
}

/// Check that an enrollment may be inserted next to `existing`.
pub(crate) fn check_enrollment_slot(
    existing: &[&SessionEnrollment],
    enrollment: &SessionEnrollment,
    capacity: Option<u32>,
) -> Result<()> {
    if existing.iter().any(|e| e.student_id == enrollment.student_id) {
        return Err(StorageError::Conflict(format!(
            "student {} already enrolled in session {}",
            enrollment.student_id, enrollment.session_id
        )));
    }
    if let Some(cap) = capacity {
        if existing.len() >= cap as usize {
            return Err(StorageError::Conflict(format!(
                "session {} is full ({} participants)",
                enrollment.session_id, cap
            )));
        }
    }
    Ok(())
}
