//! Session instantiation, enrollment and progress driving.

use std::sync::Arc;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use certrack_core::{
    AttendanceStatus, ComponentProgress, CourseId, EngineConfig, EngineError, EnrollmentId,
    ProgressId, ProgressStatus, Result, SessionEnrollment, SessionId, StudentId, TemplateId,
    Time, TrainingSession,
};
use certrack_prerequisites::PrerequisiteRegistry;
use certrack_storage::{CompletionHistory, KeyedLocks, Storage};

use crate::transition::{self, ProgressNotes};

/// Payload for instantiating a session from a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    #[serde(default)]
    pub starts_at: Option<Time>,
    /// Overrides the template cap
    #[serde(default)]
    pub max_participants: Option<i64>,
}

impl SessionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A successful enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrolled {
    /// The enrollment
    pub enrollment: SessionEnrollment,

    /// One record per pinned component, in component order
    pub progress: Vec<ComponentProgress>,

    /// RECOMMENDED prerequisites the student has not met
    pub advisories: Vec<CourseId>,
}

/// Drives students through sessions.
///
/// Writes to one progress record are serialized through a per-record lock;
/// everything else runs in parallel and relies on the storage backend for
/// atomicity.
pub struct ProgressEngine {
    storage: Arc<dyn Storage>,
    prerequisites: PrerequisiteRegistry,
    config: EngineConfig,
    locks: KeyedLocks<ProgressId>,
}

impl ProgressEngine {
    /// Create an engine with the default configuration.
    pub fn new(storage: Arc<dyn Storage>, history: Arc<dyn CompletionHistory>) -> Self {
        Self {
            prerequisites: PrerequisiteRegistry::new(storage.clone(), history),
            storage,
            config: EngineConfig::default(),
            locks: KeyedLocks::new(),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Instantiate a session, pinning the template's current components.
    pub async fn create_session(&self, template_id: TemplateId, spec: SessionSpec) -> Result<TrainingSession> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("session name must not be empty"));
        }
        let max_override = match spec.max_participants {
            Some(v) if v < 1 => {
                return Err(EngineError::validation(format!("max_participants must be at least 1, got {}", v)))
            }
            Some(v) => Some(
                u32::try_from(v).map_err(|_| EngineError::validation(format!("max_participants is too large: {}", v)))?,
            ),
            None => None,
        };

        let template = self
            .storage
            .load_template(template_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("template {}", template_id)))?;
        if !template.is_active {
            return Err(EngineError::conflict(format!("template {} is deactivated", template.code)));
        }
        let components = self.storage.list_components(template_id).await?;
        if components.is_empty() {
            return Err(EngineError::conflict(format!("template {} has no components", template.code)));
        }

        let session = TrainingSession {
            id: SessionId::new(),
            template_id,
            template_version: template.version,
            name: name.to_string(),
            starts_at: spec.starts_at,
            max_participants: max_override.or(template.max_participants),
            components,
            created_at: Utc::now(),
        };
        self.storage.save_session(&session).await?;

        info!(
            session = %session.id,
            template = %template.code,
            version = session.template_version,
            components = session.components.len(),
            "created session"
        );
        Ok(session)
    }

    /// Load a session.
    pub async fn session(&self, session_id: SessionId) -> Result<TrainingSession> {
        self.storage
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("session {}", session_id)))
    }

    /// Enroll a student.
    ///
    /// Every course the session delivers is checked against the student's
    /// history; courses in the same session satisfy CONCURRENT edges. On
    /// any unmet requirement nothing is written.
    pub async fn enroll(&self, student_id: &StudentId, session_id: SessionId) -> Result<Enrolled> {
        let session = self.session(session_id).await?;

        if !self.config.allow_inactive_enrollment {
            let active = self
                .storage
                .load_template(session.template_id)
                .await?
                .map_or(false, |t| t.is_active);
            if !active {
                return Err(EngineError::conflict(format!(
                    "template of session {} is no longer active",
                    session_id
                )));
            }
        }

        let eligibility = self
            .prerequisites
            .check(student_id, &session.course_ids(), Utc::now())
            .await?;
        if !eligibility.eligible {
            warn!(
                student = %student_id,
                session = %session_id,
                missing = eligibility.missing.len(),
                "enrollment blocked by prerequisites"
            );
            return Err(EngineError::Prerequisite {
                missing: eligibility.missing,
            });
        }
        if !eligibility.advisories.is_empty() {
            debug!(student = %student_id, advisories = ?eligibility.advisories, "recommended courses missing");
        }

        let now = Utc::now();
        let enrollment_id = EnrollmentId::new();
        let progress: Vec<ComponentProgress> = session
            .components
            .iter()
            .map(|c| ComponentProgress::new(enrollment_id, c, self.config.default_max_attempts, now))
            .collect();
        let enrollment = SessionEnrollment {
            id: enrollment_id,
            session_id,
            student_id: student_id.clone(),
            template_version: session.template_version,
            progress_ids: progress.iter().map(|p| p.id).collect(),
            enrolled_at: now,
        };

        self.storage
            .create_enrollment(&enrollment, &progress, session.max_participants)
            .await?;

        info!(
            student = %student_id,
            session = %session_id,
            enrollment = %enrollment_id,
            components = progress.len(),
            "enrolled student"
        );
        Ok(Enrolled {
            enrollment,
            progress,
            advisories: eligibility.advisories,
        })
    }

    /// Start a component, or restart a failed assessment.
    pub async fn start(&self, progress_id: ProgressId) -> Result<ComponentProgress> {
        self.mutate(progress_id, "start", transition::start).await
    }

    /// Finish a component without an assessment.
    pub async fn complete(&self, progress_id: ProgressId) -> Result<ComponentProgress> {
        self.mutate(progress_id, "complete", transition::complete).await
    }

    /// Grade an assessment attempt.
    pub async fn record_score(&self, progress_id: ProgressId, score: f32) -> Result<ComponentProgress> {
        self.mutate(progress_id, "record_score", move |p, now| {
            transition::record_score(p, score, now)
        })
        .await
    }

    /// Reopen a failed assessment.
    pub async fn retry(&self, progress_id: ProgressId) -> Result<ComponentProgress> {
        self.mutate(progress_id, "retry", transition::retry).await
    }

    /// Skip a component; mandatory ones need a reason.
    pub async fn skip(&self, progress_id: ProgressId, reason: Option<String>) -> Result<ComponentProgress> {
        self.mutate(progress_id, "skip", move |p, now| {
            transition::waive(p, ProgressStatus::Skipped, reason, now)
        })
        .await
    }

    /// Excuse a student from a component; mandatory ones need a reason.
    pub async fn excuse(&self, progress_id: ProgressId, reason: Option<String>) -> Result<ComponentProgress> {
        self.mutate(progress_id, "excuse", move |p, now| {
            transition::waive(p, ProgressStatus::Excused, reason, now)
        })
        .await
    }

    /// Record attendance for a component.
    pub async fn record_attendance(
        &self,
        progress_id: ProgressId,
        attendance: AttendanceStatus,
        percentage: Option<f32>,
    ) -> Result<ComponentProgress> {
        let enforce = self.config.enforce_excused_attendance;
        self.mutate(progress_id, "record_attendance", move |p, now| {
            transition::record_attendance(p, attendance, percentage, enforce, now)
        })
        .await
    }

    /// Record notes and participation.
    pub async fn record_notes(&self, progress_id: ProgressId, notes: ProgressNotes) -> Result<ComponentProgress> {
        self.mutate(progress_id, "record_notes", move |p, _| transition::record_notes(p, notes))
            .await
    }

    /// Progress records of an enrollment, in component order.
    pub async fn enrollment_progress(&self, enrollment_id: EnrollmentId) -> Result<Vec<ComponentProgress>> {
        let enrollment = self
            .storage
            .load_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("enrollment {}", enrollment_id)))?;
        let mut rows = self.storage.list_progress(enrollment_id).await?;
        rows.sort_by_key(|p| {
            enrollment
                .progress_ids
                .iter()
                .position(|id| *id == p.id)
                .unwrap_or(usize::MAX)
        });
        Ok(rows)
    }

    /// Load one progress record.
    pub async fn progress(&self, progress_id: ProgressId) -> Result<ComponentProgress> {
        self.storage
            .load_progress(progress_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("progress {}", progress_id)))
    }

    async fn mutate<F>(&self, progress_id: ProgressId, action: &'static str, f: F) -> Result<ComponentProgress>
    where
        F: FnOnce(&mut ComponentProgress, Time) -> Result<()> + Send,
    {
        let _guard = self.locks.lock(&progress_id).await;
        let mut progress = self.progress(progress_id).await?;
        let from = progress.status;
        let expected = progress.version;
        let now = Utc::now();

        if let Err(err) = f(&mut progress, now) {
            debug!(progress = %progress_id, action, status = %from, error = %err, "rejected");
            return Err(err);
        }

        progress.version = expected + 1;
        progress.updated_at = now;
        self.storage.update_progress(&progress, expected).await?;

        info!(
            progress = %progress_id,
            action,
            from = %from,
            to = %progress.status,
            attempts = progress.attempts,
            "updated progress"
        );
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrack_core::{CompletionRecord, CoursePrerequisite, MissingRequirement, PrerequisiteType, UnmetReason};
    use certrack_storage::MemoryStorage;
    use certrack_templates::{ComponentSpec, TemplateSpec, TemplateStore};

    struct Fixture {
        storage: Arc<MemoryStorage>,
        templates: TemplateStore,
        engine: ProgressEngine,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        Fixture {
            templates: TemplateStore::new(storage.clone()),
            engine: ProgressEngine::new(storage.clone(), storage.clone()),
            storage,
        }
    }

    async fn template(f: &Fixture, components: Vec<ComponentSpec>) -> TemplateId {
        let id = f
            .templates
            .create_template(TemplateSpec::new("Safety Day", "SD-1", "MULTI_COURSE"))
            .await
            .unwrap()
            .template
            .id;
        for c in components {
            f.templates.add_component(id, c).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_enroll_creates_progress_rows() {
        let f = fixture();
        let tid = template(
            &f,
            vec![
                ComponentSpec::course("Intro", "FA-101", 60),
                ComponentSpec::short_break(15),
                ComponentSpec::new("Exam", "ASSESSMENT", 30).with_assessment("WRITTEN", 70.0, None),
            ],
        )
        .await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();

        let enrolled = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();
        assert_eq!(enrolled.progress.len(), 3);
        for p in &enrolled.progress {
            assert_eq!(p.status, ProgressStatus::NotStarted);
            assert_eq!(p.attendance_status, AttendanceStatus::Registered);
            assert_eq!(p.attempts, 0);
        }
        assert_eq!(enrolled.progress[2].max_attempts, 3);

        let rows = f.engine.enrollment_progress(enrolled.enrollment.id).await.unwrap();
        let ids: Vec<ProgressId> = rows.iter().map(|p| p.id).collect();
        assert_eq!(ids, enrolled.enrollment.progress_ids);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_blocks_enrollment() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::course("Advanced", "FA-201", 60)]).await;
        f.engine
            .prerequisites
            .add_edge(CoursePrerequisite::new("FA-201", "FA-101", PrerequisiteType::Required))
            .await
            .unwrap();
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();

        let err = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap_err();
        match err {
            EngineError::Prerequisite { missing } => {
                assert_eq!(missing.len(), 1);
                assert!(matches!(
                    &missing[0],
                    MissingRequirement::Course { course_id, reason: UnmetReason::NotCompleted, .. }
                        if course_id.as_str() == "FA-101"
                ));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(f.storage.list_enrollments(session.id).await.unwrap().is_empty());
        let component = session.components[0].id;
        assert_eq!(f.storage.count_progress_for_component(component).await.unwrap(), 0);

        f.storage
            .record_completion(
                &StudentId::new("s-1"),
                CompletionRecord {
                    course_id: CourseId::new("FA-101"),
                    passed: true,
                    score: Some(90.0),
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert!(f.engine.enroll(&StudentId::new("s-1"), session.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_course_in_same_session() {
        let f = fixture();
        let tid = template(
            &f,
            vec![
                ComponentSpec::course("Theory", "FA-101", 60),
                ComponentSpec::course("Lab", "FA-102", 60),
            ],
        )
        .await;
        f.engine
            .prerequisites
            .add_edge(CoursePrerequisite::new("FA-102", "FA-101", PrerequisiteType::Concurrent))
            .await
            .unwrap();
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        assert!(f.engine.enroll(&StudentId::new("s-1"), session.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_and_full_session() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::course("Intro", "FA-101", 60)]).await;
        let mut spec = SessionSpec::new("Monday");
        spec.max_participants = Some(1);
        let session = f.engine.create_session(tid, spec).await.unwrap();

        f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();
        let dup = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap_err();
        assert!(matches!(dup, EngineError::Conflict(_)));
        let full = f.engine.enroll(&StudentId::new("s-2"), session.id).await.unwrap_err();
        assert!(matches!(full, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_inactive_template_refuses_sessions() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::course("Intro", "FA-101", 60)]).await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        f.templates.deactivate_template(tid).await.unwrap();

        let err = f.engine.create_session(tid, SessionSpec::new("Tuesday")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        let err = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_optional_component_skipped_directly() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::new("Q&A", "DISCUSSION", 30).optional()]).await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let enrolled = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();

        let p = f.engine.skip(enrolled.progress[0].id, None).await.unwrap();
        assert_eq!(p.status, ProgressStatus::Skipped);
        assert_eq!(p.version, 1);
    }

    #[tokio::test]
    async fn test_assessment_attempts() {
        let f = fixture();
        let tid = template(
            &f,
            vec![ComponentSpec::new("Exam", "ASSESSMENT", 60).with_assessment("WRITTEN", 80.0, Some(2))],
        )
        .await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let id = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap().progress[0].id;

        f.engine.start(id).await.unwrap();
        let p = f.engine.record_score(id, 65.0).await.unwrap();
        assert_eq!((p.status, p.attempts), (ProgressStatus::Failed, 1));

        f.engine.retry(id).await.unwrap();
        let p = f.engine.record_score(id, 85.0).await.unwrap();
        assert_eq!((p.status, p.attempts), (ProgressStatus::Passed, 2));
        assert_eq!(p.passed, Some(true));

        let err = f.engine.retry(id).await.unwrap_err();
        assert!(matches!(err, EngineError::AttemptsExhausted { attempts: 2, max_attempts: 2 }));
        let err = f.engine.record_score(id, 90.0).await.unwrap_err();
        assert!(matches!(err, EngineError::AttemptsExhausted { .. }));

        let stored = f.engine.progress(id).await.unwrap();
        assert_eq!(stored.score, Some(85.0));
        assert_eq!(stored.status, ProgressStatus::Passed);
    }

    #[tokio::test]
    async fn test_template_edits_do_not_reach_sessions() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::course("Intro", "FA-101", 60)]).await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();

        f.templates
            .add_component(tid, ComponentSpec::course("Extra", "FA-102", 60))
            .await
            .unwrap();

        let enrolled = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();
        assert_eq!(enrolled.progress.len(), 1);
        assert_eq!(enrolled.enrollment.template_version, 1);
    }

    #[tokio::test]
    async fn test_parallel_updates_on_one_record() {
        let f = fixture();
        let tid = template(&f, vec![ComponentSpec::course("Intro", "FA-101", 60)]).await;
        let session = f.engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let id = f.engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap().progress[0].id;
        let engine = Arc::new(f.engine);

        let mut handles = Vec::new();
        for i in 0..10 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let notes = ProgressNotes {
                    instructor_notes: Some(format!("note {}", i)),
                    ..Default::default()
                };
                engine.record_notes(id, notes).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(engine.progress(id).await.unwrap().version, 10);
    }
}
