//! In-memory storage backend.
//!
//! Everything lives behind one `RwLock`, so multi-record writes are applied
//! inside a single critical section and are never partially visible.

use std::collections::HashMap;
use async_trait::async_trait;
use certrack_core::{
    ComponentId, ComponentProgress, CompletionRecord, CourseId, CoursePrerequisite,
    EnrollmentId, PrerequisiteId, ProgressId, SessionEnrollment, SessionId, SessionTemplate,
    StudentHistory, StudentId, TemplateComponent, TemplateFilter, TemplateId, TrainingSession,
};
use tokio::sync::RwLock;
use super::trait_::check_enrollment_slot;
use super::{CompletionHistory, ComponentChanges, Result, Storage, StorageError};

#[derive(Default)]
struct Inner {
    templates: HashMap<TemplateId, SessionTemplate>,
    components: HashMap<ComponentId, TemplateComponent>,
    prerequisites: HashMap<PrerequisiteId, CoursePrerequisite>,
    sessions: HashMap<SessionId, TrainingSession>,
    enrollments: HashMap<EnrollmentId, SessionEnrollment>,
    progress: HashMap<ProgressId, ComponentProgress>,
    history: HashMap<StudentId, StudentHistory>,
}

/// Volatile storage for tests and embedding.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_template(&self, template: &SessionTemplate) -> Result<()> {
        self.inner.write().await.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn load_template(&self, id: TemplateId) -> Result<Option<SessionTemplate>> {
        Ok(self.inner.read().await.templates.get(&id).cloned())
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<SessionTemplate>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .templates
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn delete_template(&self, id: TemplateId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.templates.remove(&id);
        inner.components.retain(|_, c| c.session_template_id != id);
        Ok(())
    }

    async fn load_component(&self, id: ComponentId) -> Result<Option<TemplateComponent>> {
        Ok(self.inner.read().await.components.get(&id).cloned())
    }

    async fn list_components(&self, template_id: TemplateId) -> Result<Vec<TemplateComponent>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .components
            .values()
            .filter(|c| c.session_template_id == template_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.sequence_order);
        Ok(out)
    }

    async fn write_components(&self, changes: &ComponentChanges) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.templates.contains_key(&changes.template.id) {
            return Err(StorageError::NotFound(format!("template {}", changes.template.id)));
        }
        inner.templates.insert(changes.template.id, changes.template.clone());
        for id in &changes.removals {
            inner.components.remove(id);
        }
        for component in &changes.upserts {
            inner.components.insert(component.id, component.clone());
        }
        Ok(())
    }

    async fn save_prerequisite(&self, edge: &CoursePrerequisite) -> Result<()> {
        self.inner.write().await.prerequisites.insert(edge.id, edge.clone());
        Ok(())
    }

    async fn delete_prerequisite(&self, id: PrerequisiteId) -> Result<()> {
        self.inner.write().await.prerequisites.remove(&id);
        Ok(())
    }

    async fn list_prerequisites(&self, course_id: Option<&CourseId>) -> Result<Vec<CoursePrerequisite>> {
        let inner = self.inner.read().await;
        Ok(inner
            .prerequisites
            .values()
            .filter(|e| course_id.map_or(true, |c| &e.course_id == c))
            .cloned()
            .collect())
    }

    async fn save_session(&self, session: &TrainingSession) -> Result<()> {
        self.inner.write().await.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<TrainingSession>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, template_id: Option<TemplateId>) -> Result<Vec<TrainingSession>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| template_id.map_or(true, |t| s.template_id == t))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn create_enrollment(
        &self,
        enrollment: &SessionEnrollment,
        progress: &[ComponentProgress],
        capacity: Option<u32>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let existing: Vec<&SessionEnrollment> = inner
            .enrollments
            .values()
            .filter(|e| e.session_id == enrollment.session_id)
            .collect();
        check_enrollment_slot(&existing, enrollment, capacity)?;

        inner.enrollments.insert(enrollment.id, enrollment.clone());
        for row in progress {
            inner.progress.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn load_enrollment(&self, id: EnrollmentId) -> Result<Option<SessionEnrollment>> {
        Ok(self.inner.read().await.enrollments.get(&id).cloned())
    }

    async fn list_enrollments(&self, session_id: SessionId) -> Result<Vec<SessionEnrollment>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .enrollments
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.enrolled_at);
        Ok(out)
    }

    async fn load_progress(&self, id: ProgressId) -> Result<Option<ComponentProgress>> {
        Ok(self.inner.read().await.progress.get(&id).cloned())
    }

    async fn list_progress(&self, enrollment_id: EnrollmentId) -> Result<Vec<ComponentProgress>> {
        let inner = self.inner.read().await;
        Ok(inner
            .progress
            .values()
            .filter(|p| p.session_enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn update_progress(&self, progress: &ComponentProgress, expected_version: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let current = inner
            .progress
            .get(&progress.id)
            .ok_or_else(|| StorageError::NotFound(format!("progress {}", progress.id)))?;
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: progress.id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        inner.progress.insert(progress.id, progress.clone());
        Ok(())
    }

    async fn count_progress_for_component(&self, component_id: ComponentId) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .progress
            .values()
            .filter(|p| p.session_template_component_id == component_id)
            .count())
    }
}

#[async_trait]
impl CompletionHistory for MemoryStorage {
    async fn history(&self, student_id: &StudentId) -> Result<StudentHistory> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .get(student_id)
            .cloned()
            .unwrap_or_else(|| StudentHistory::new(student_id.clone())))
    }

    async fn record_completion(&self, student_id: &StudentId, record: CompletionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(student_id.clone())
            .or_insert_with(|| StudentHistory::new(student_id.clone()))
            .completions
            .push(record);
        Ok(())
    }

    async fn add_qualification(&self, student_id: &StudentId, qualification: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .history
            .entry(student_id.clone())
            .or_insert_with(|| StudentHistory::new(student_id.clone()));
        if !entry.holds_qualification(qualification) {
            entry.qualifications.push(qualification.trim().to_string());
        }
        Ok(())
    }
}
