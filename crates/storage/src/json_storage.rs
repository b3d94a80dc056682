//! JSON file storage implementation.
//!
//! Stores data as JSON files in a data directory and keeps small per-object
//! meta markers (version + updated_at). Multi-record writes stage every file
//! under a temporary name first and only then rename them into place while
//! holding the write gate, so readers never observe half of a change set.

use std::path::{Path, PathBuf};
use certrack_core::{
    ComponentId, ComponentProgress, CompletionRecord, CourseId, CoursePrerequisite,
    EnrollmentId, PrerequisiteId, ProgressId, SessionEnrollment, SessionId, SessionTemplate,
    StudentHistory, StudentId, TemplateComponent, TemplateFilter, TemplateId, TrainingSession,
};
use super::trait_::check_enrollment_slot;
use super::{CompletionHistory, ComponentChanges, Result, Storage, StorageError};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const KINDS: &[&str] = &[
    "templates",
    "components",
    "prerequisites",
    "sessions",
    "enrollments",
    "progress",
    "history",
];

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    gate: RwLock<()>,
}

impl JsonStorage {
    /// Create storage, creating the data and meta directories as needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for kind in KINDS {
            fs::create_dir_all(root.join(kind)).await?;
            fs::create_dir_all(root.join("meta").join(kind)).await?;
        }

        Ok(Self {
            root,
            gate: RwLock::new(()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entity_path(&self, kind: &str, id: impl std::fmt::Display) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", id))
    }

    fn history_path(&self, student_id: &StudentId) -> PathBuf {
        // Student ids are external; hex keeps file names portable and one per id.
        let encoded: String = student_id
            .as_str()
            .bytes()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.root.join("history").join(format!("{}.json", encoded))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        fs::write(&path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }

    async fn save_entity<T: serde::Serialize>(
        &self,
        kind: &str,
        id: impl std::fmt::Display,
        value: &T,
    ) -> Result<()> {
        let id = id.to_string();
        let _gate = self.gate.write().await;
        write_atomic(&self.entity_path(kind, &id), value).await?;
        self.bump_version(kind, &id).await?;
        Ok(())
    }

    async fn remove_entity(&self, kind: &str, id: impl std::fmt::Display) -> Result<()> {
        let id = id.to_string();
        remove_if_exists(&self.entity_path(kind, &id)).await?;
        remove_if_exists(&self.meta_path(kind, &id)).await?;
        Ok(())
    }

    /// Stage `writes`, then publish them and apply `removals`.
    ///
    /// Must be called with the write gate held.
    async fn commit_batch(&self, writes: Vec<(PathBuf, Vec<u8>)>, removals: Vec<PathBuf>) -> Result<()> {
        let mut staged = Vec::with_capacity(writes.len());
        for (path, bytes) in writes {
            let tmp = tmp_path(&path);
            if let Err(e) = fs::write(&tmp, &bytes).await {
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp).await;
                }
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            staged.push((tmp, path));
        }

        for (tmp, path) in &staged {
            fs::rename(tmp, path).await?;
        }
        for path in &removals {
            remove_if_exists(path).await?;
        }
        debug!(written = staged.len(), removed = removals.len(), "committed batch");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_template(&self, template: &SessionTemplate) -> Result<()> {
        self.save_entity("templates", template.id, template).await
    }

    async fn load_template(&self, id: TemplateId) -> Result<Option<SessionTemplate>> {
        let _gate = self.gate.read().await;
        read_json(&self.entity_path("templates", id)).await
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<SessionTemplate>> {
        let _gate = self.gate.read().await;
        let all: Vec<SessionTemplate> = list_dir(&self.root.join("templates")).await?;
        let mut out: Vec<_> = all.into_iter().filter(|t| filter.matches(t)).collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn delete_template(&self, id: TemplateId) -> Result<()> {
        let _gate = self.gate.write().await;
        let components: Vec<TemplateComponent> = list_dir(&self.root.join("components")).await?;
        for c in components.iter().filter(|c| c.session_template_id == id) {
            self.remove_entity("components", c.id).await?;
        }
        self.remove_entity("templates", id).await
    }

    async fn load_component(&self, id: ComponentId) -> Result<Option<TemplateComponent>> {
        let _gate = self.gate.read().await;
        read_json(&self.entity_path("components", id)).await
    }

    async fn list_components(&self, template_id: TemplateId) -> Result<Vec<TemplateComponent>> {
        let _gate = self.gate.read().await;
        let all: Vec<TemplateComponent> = list_dir(&self.root.join("components")).await?;
        let mut out: Vec<_> = all
            .into_iter()
            .filter(|c| c.session_template_id == template_id)
            .collect();
        out.sort_by_key(|c| c.sequence_order);
        Ok(out)
    }

    async fn write_components(&self, changes: &ComponentChanges) -> Result<()> {
        let _gate = self.gate.write().await;
        let template_path = self.entity_path("templates", changes.template.id);
        if fs::metadata(&template_path).await.is_err() {
            return Err(StorageError::NotFound(format!("template {}", changes.template.id)));
        }

        let mut writes = vec![(template_path, serde_json::to_vec_pretty(&changes.template)?)];
        for c in &changes.upserts {
            writes.push((self.entity_path("components", c.id), serde_json::to_vec_pretty(c)?));
        }
        let removals = changes
            .removals
            .iter()
            .map(|id| self.entity_path("components", id))
            .collect();

        self.commit_batch(writes, removals).await?;
        self.bump_version("templates", &changes.template.id.to_string()).await?;
        Ok(())
    }

    async fn save_prerequisite(&self, edge: &CoursePrerequisite) -> Result<()> {
        self.save_entity("prerequisites", edge.id, edge).await
    }

    async fn delete_prerequisite(&self, id: PrerequisiteId) -> Result<()> {
        let _gate = self.gate.write().await;
        self.remove_entity("prerequisites", id).await
    }

    async fn list_prerequisites(&self, course_id: Option<&CourseId>) -> Result<Vec<CoursePrerequisite>> {
        let _gate = self.gate.read().await;
        let all: Vec<CoursePrerequisite> = list_dir(&self.root.join("prerequisites")).await?;
        Ok(all
            .into_iter()
            .filter(|e| course_id.map_or(true, |c| &e.course_id == c))
            .collect())
    }

    async fn save_session(&self, session: &TrainingSession) -> Result<()> {
        self.save_entity("sessions", session.id, session).await
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<TrainingSession>> {
        let _gate = self.gate.read().await;
        read_json(&self.entity_path("sessions", id)).await
    }

    async fn list_sessions(&self, template_id: Option<TemplateId>) -> Result<Vec<TrainingSession>> {
        let _gate = self.gate.read().await;
        let all: Vec<TrainingSession> = list_dir(&self.root.join("sessions")).await?;
        let mut out: Vec<_> = all
            .into_iter()
            .filter(|s| template_id.map_or(true, |t| s.template_id == t))
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
        let _gate = self.gate.write().await;
        let all: Vec<SessionEnrollment> = list_dir(&self.root.join("enrollments")).await?;
        let existing: Vec<&SessionEnrollment> = all
            .iter()
            .filter(|e| e.session_id == enrollment.session_id)
            .collect();
        check_enrollment_slot(&existing, enrollment, capacity)?;

        let mut writes = Vec::with_capacity(progress.len() + 1);
        for row in progress {
            writes.push((self.entity_path("progress", row.id), serde_json::to_vec_pretty(row)?));
        }
        // Published last so a visible enrollment always has its rows.
        writes.push((
            self.entity_path("enrollments", enrollment.id),
            serde_json::to_vec_pretty(enrollment)?,
        ));
        self.commit_batch(writes, Vec::new()).await
    }

    async fn load_enrollment(&self, id: EnrollmentId) -> Result<Option<SessionEnrollment>> {
        let _gate = self.gate.read().await;
        read_json(&self.entity_path("enrollments", id)).await
    }

    async fn list_enrollments(&self, session_id: SessionId) -> Result<Vec<SessionEnrollment>> {
        let _gate = self.gate.read().await;
        let all: Vec<SessionEnrollment> = list_dir(&self.root.join("enrollments")).await?;
        let mut out: Vec<_> = all.into_iter().filter(|e| e.session_id == session_id).collect();
        out.sort_by_key(|e| e.enrolled_at);
        Ok(out)
    }

    async fn load_progress(&self, id: ProgressId) -> Result<Option<ComponentProgress>> {
        let _gate = self.gate.read().await;
        read_json(&self.entity_path("progress", id)).await
    }

    async fn list_progress(&self, enrollment_id: EnrollmentId) -> Result<Vec<ComponentProgress>> {
        let _gate = self.gate.read().await;
        let all: Vec<ComponentProgress> = list_dir(&self.root.join("progress")).await?;
        Ok(all
            .into_iter()
            .filter(|p| p.session_enrollment_id == enrollment_id)
            .collect())
    }

    async fn update_progress(&self, progress: &ComponentProgress, expected_version: u64) -> Result<()> {
        let _gate = self.gate.write().await;
        let path = self.entity_path("progress", progress.id);
        let current: ComponentProgress = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("progress {}", progress.id)))?;
        if current.version != expected_version {
            warn!(id = %progress.id, expected_version, found = current.version, "stale progress write");
            return Err(StorageError::VersionConflict {
                id: progress.id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        write_atomic(&path, progress).await?;
        self.bump_version("progress", &progress.id.to_string()).await?;
        Ok(())
    }

    async fn count_progress_for_component(&self, component_id: ComponentId) -> Result<usize> {
        let _gate = self.gate.read().await;
        let all: Vec<ComponentProgress> = list_dir(&self.root.join("progress")).await?;
        Ok(all
            .iter()
            .filter(|p| p.session_template_component_id == component_id)
            .count())
    }
}

#[async_trait::async_trait]
impl CompletionHistory for JsonStorage {
    async fn history(&self, student_id: &StudentId) -> Result<StudentHistory> {
        let _gate = self.gate.read().await;
        Ok(read_json(&self.history_path(student_id))
            .await?
            .unwrap_or_else(|| StudentHistory::new(student_id.clone())))
    }

    async fn record_completion(&self, student_id: &StudentId, record: CompletionRecord) -> Result<()> {
        let _gate = self.gate.write().await;
        let path = self.history_path(student_id);
        let mut history: StudentHistory = read_json(&path)
            .await?
            .unwrap_or_else(|| StudentHistory::new(student_id.clone()));
        history.completions.push(record);
        write_atomic(&path, &history).await
    }

    async fn add_qualification(&self, student_id: &StudentId, qualification: &str) -> Result<()> {
        let _gate = self.gate.write().await;
        let path = self.history_path(student_id);
        let mut history: StudentHistory = read_json(&path)
            .await?
            .unwrap_or_else(|| StudentHistory::new(student_id.clone()));
        if !history.holds_qualification(qualification) {
            history.qualifications.push(qualification.trim().to_string());
        }
        write_atomic(&path, &history).await
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "unreadable record");
                return Err(e);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrack_core::{
        ComponentType, EngineConfig, TemplateType,
    };
    use chrono::Utc;

    fn template() -> SessionTemplate {
        SessionTemplate {
            id: TemplateId::new(),
            name: "First Aid".to_string(),
            code: "FA-1".to_string(),
            description: String::new(),
            template_type: TemplateType::SingleCourse,
            total_duration_minutes: 120,
            estimated_break_minutes: 0,
            max_participants: Some(12),
            is_active: true,
            is_public: true,
            requires_approval: false,
            required_instructors: 1,
            required_rooms: 1,
            required_equipment: vec!["manikin".to_string()],
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn component(template_id: TemplateId, order: u32) -> TemplateComponent {
        TemplateComponent {
            id: ComponentId::new(),
            session_template_id: template_id,
            name: format!("step {}", order),
            course_id: None,
            component_type: ComponentType::Activity,
            sequence_order: order,
            duration_minutes: 60,
            is_break: false,
            break_type: None,
            is_mandatory: true,
            allows_parallel: false,
            instructor_required: true,
            room_required: true,
            equipment_required: false,
            max_participants: None,
            has_assessment: false,
            assessment_type: None,
            min_score_required: None,
            max_attempts: None,
            special_requirements: None,
        }
    }

    #[tokio::test]
    async fn test_template_component_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let mut t = template();
        storage.save_template(&t).await.unwrap();

        let comps = vec![component(t.id, 2), component(t.id, 1)];
        t.version += 1;
        storage
            .write_components(&ComponentChanges {
                template: t.clone(),
                upserts: comps.clone(),
                removals: vec![],
            })
            .await
            .unwrap();

        let loaded = storage.load_template(t.id).await.unwrap().unwrap();
        assert_eq!(loaded, t);

        let listed = storage.list_components(t.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], comps[1]);
        assert_eq!(listed[1], comps[0]);
    }

    #[tokio::test]
    async fn test_write_components_unknown_template() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let t = template();

        let err = storage
            .write_components(&ComponentChanges {
                template: t.clone(),
                upserts: vec![component(t.id, 1)],
                removals: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(storage.list_components(t.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_version_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let t = template();
        let c = component(t.id, 1);

        let enrollment = SessionEnrollment {
            id: EnrollmentId::new(),
            session_id: SessionId::new(),
            student_id: StudentId::new("s-1"),
            template_version: 1,
            progress_ids: vec![],
            enrolled_at: Utc::now(),
        };
        let row = ComponentProgress::new(
            enrollment.id,
            &c,
            EngineConfig::default().default_max_attempts,
            Utc::now(),
        );
        storage.create_enrollment(&enrollment, &[row.clone()], None).await.unwrap();

        let mut next = row.clone();
        next.version = 1;
        storage.update_progress(&next, 0).await.unwrap();

        let err = storage.update_progress(&next, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { found: 1, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let session_id = SessionId::new();

        let first = SessionEnrollment {
            id: EnrollmentId::new(),
            session_id,
            student_id: StudentId::new("s-1"),
            template_version: 1,
            progress_ids: vec![],
            enrolled_at: Utc::now(),
        };
        storage.create_enrollment(&first, &[], Some(5)).await.unwrap();

        let mut again = first.clone();
        again.id = EnrollmentId::new();
        let err = storage.create_enrollment(&again, &[], Some(5)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(storage.list_enrollments(session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let student = StudentId::new("jane@example.org");

        assert!(storage.history(&student).await.unwrap().completions.is_empty());

        storage
            .record_completion(
                &student,
                CompletionRecord {
                    course_id: CourseId::new("FA-101"),
                    passed: true,
                    score: Some(91.0),
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        storage.add_qualification(&student, "Paramedic").await.unwrap();
        storage.add_qualification(&student, "paramedic").await.unwrap();

        let history = storage.history(&student).await.unwrap();
        assert_eq!(history.completions.len(), 1);
        assert_eq!(history.qualifications, vec!["Paramedic".to_string()]);
    }

    #[tokio::test]
    async fn test_history_kept_apart_for_similar_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        storage
            .record_completion(
                &StudentId::new("a.b"),
                CompletionRecord {
                    course_id: CourseId::new("FA-101"),
                    passed: true,
                    score: None,
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        for other in ["a_b", "a@b", "a/b", "A.B"] {
            let history = storage.history(&StudentId::new(other)).await.unwrap();
            assert!(history.completions.is_empty(), "{} saw another student's record", other);
            assert_eq!(history.student_id.as_str(), other);
        }
        assert_eq!(storage.history(&StudentId::new("a.b")).await.unwrap().completions.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_progress_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let t = template();
        let c = component(t.id, 1);

        let enrollment = SessionEnrollment {
            id: EnrollmentId::new(),
            session_id: SessionId::new(),
            student_id: StudentId::new("s-1"),
            template_version: 1,
            progress_ids: vec![],
            enrolled_at: Utc::now(),
        };
        let row = ComponentProgress::new(enrollment.id, &c, 3, Utc::now());
        storage.create_enrollment(&enrollment, &[row.clone()], None).await.unwrap();
        assert_eq!(storage.count_progress_for_component(c.id).await.unwrap(), 1);

        let path = dir.path().join("progress").join(format!("{}.json", row.id));
        tokio::fs::write(&path, b"{\"id\": ").await.unwrap();

        let err = storage.count_progress_for_component(c.id).await.unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
        assert!(storage.list_progress(enrollment.id).await.is_err());
    }
}
