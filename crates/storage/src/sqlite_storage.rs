//! SQLite storage backend for certrack.
//!
//! Entities are stored as JSON documents in one table, indexed by kind,
//! owning parent and (for progress rows) the referenced component. Change
//! sets and enrollments run inside SQL transactions.

use std::path::Path;
use async_trait::async_trait;
use certrack_core::{
    ComponentId, ComponentProgress, CompletionRecord, CourseId, CoursePrerequisite,
    EnrollmentId, PrerequisiteId, ProgressId, SessionEnrollment, SessionId, SessionTemplate,
    StudentHistory, StudentId, TemplateComponent, TemplateFilter, TemplateId, TrainingSession,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::trait_::check_enrollment_slot;
use super::{CompletionHistory, ComponentChanges, Result, Storage, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) a database file.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // A single connection: every `:memory:` connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                parent_id TEXT,
                ref_id TEXT,
                data TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS student_history (
                student_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_type_parent ON entities(entity_type, parent_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_ref ON entities(entity_type, ref_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_one<T: serde::de::DeserializeOwned>(&self, kind: &str, id: String) -> Result<Option<T>> {
        let row = sqlx::query("SELECT data FROM entities WHERE entity_type = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn load_many<T: serde::de::DeserializeOwned>(&self, kind: &str, parent: Option<String>) -> Result<Vec<T>> {
        let rows = match parent {
            Some(parent) => {
                sqlx::query("SELECT data FROM entities WHERE entity_type = ? AND parent_id = ?")
                    .bind(kind)
                    .bind(parent)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT data FROM entities WHERE entity_type = ?")
                    .bind(kind)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn load_history(conn: &mut SqliteConnection, student_id: &StudentId) -> Result<StudentHistory> {
        let row = sqlx::query("SELECT data FROM student_history WHERE student_id = ?")
            .bind(student_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            }
            None => Ok(StudentHistory::new(student_id.clone())),
        }
    }

    async fn store_history(conn: &mut SqliteConnection, history: &StudentHistory) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO student_history (student_id, data) VALUES (?, ?)")
            .bind(history.student_id.as_str())
            .bind(serde_json::to_string(history)?)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

async fn upsert<T: serde::Serialize>(
    conn: &mut SqliteConnection,
    kind: &str,
    id: String,
    parent: Option<String>,
    reference: Option<String>,
    value: &T,
    version: u64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO entities (id, entity_type, parent_id, ref_id, data, version, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(parent)
    .bind(reference)
    .bind(serde_json::to_string(value)?)
    .bind(version as i64)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_template(&self, template: &SessionTemplate) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, "template", template.id.to_string(), None, None, template, template.version as u64).await
    }

    async fn load_template(&self, id: TemplateId) -> Result<Option<SessionTemplate>> {
        self.load_one("template", id.to_string()).await
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<SessionTemplate>> {
        let all: Vec<SessionTemplate> = self.load_many("template", None).await?;
        let mut out: Vec<_> = all.into_iter().filter(|t| filter.matches(t)).collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn delete_template(&self, id: TemplateId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities WHERE entity_type = 'component' AND parent_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entities WHERE entity_type = 'template' AND id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_component(&self, id: ComponentId) -> Result<Option<TemplateComponent>> {
        self.load_one("component", id.to_string()).await
    }

    async fn list_components(&self, template_id: TemplateId) -> Result<Vec<TemplateComponent>> {
        let mut out: Vec<TemplateComponent> =
            self.load_many("component", Some(template_id.to_string())).await?;
        out.sort_by_key(|c| c.sequence_order);
        Ok(out)
    }

    async fn write_components(&self, changes: &ComponentChanges) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM entities WHERE entity_type = 'template' AND id = ?")
            .bind(changes.template.id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(StorageError::NotFound(format!("template {}", changes.template.id)));
        }

        let template = &changes.template;
        upsert(&mut tx, "template", template.id.to_string(), None, None, template, template.version as u64).await?;
        for id in &changes.removals {
            sqlx::query("DELETE FROM entities WHERE entity_type = 'component' AND id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        for c in &changes.upserts {
            upsert(
                &mut tx,
                "component",
                c.id.to_string(),
                Some(c.session_template_id.to_string()),
                None,
                c,
                0,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_prerequisite(&self, edge: &CoursePrerequisite) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(
            &mut conn,
            "prerequisite",
            edge.id.to_string(),
            Some(edge.course_id.to_string()),
            Some(edge.prerequisite_course_id.to_string()),
            edge,
            0,
        )
        .await
    }

    async fn delete_prerequisite(&self, id: PrerequisiteId) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE entity_type = 'prerequisite' AND id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_prerequisites(&self, course_id: Option<&CourseId>) -> Result<Vec<CoursePrerequisite>> {
        self.load_many("prerequisite", course_id.map(|c| c.to_string())).await
    }

    async fn save_session(&self, session: &TrainingSession) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(
            &mut conn,
            "session",
            session.id.to_string(),
            Some(session.template_id.to_string()),
            None,
            session,
            0,
        )
        .await
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<TrainingSession>> {
        self.load_one("session", id.to_string()).await
    }

    async fn list_sessions(&self, template_id: Option<TemplateId>) -> Result<Vec<TrainingSession>> {
        let mut out: Vec<TrainingSession> =
            self.load_many("session", template_id.map(|t| t.to_string())).await?;
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn create_enrollment(
        &self,
        enrollment: &SessionEnrollment,
        progress: &[ComponentProgress],
        capacity: Option<u32>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'enrollment' AND parent_id = ?")
            .bind(enrollment.session_id.to_string())
            .fetch_all(&mut *tx)
            .await?;
        let mut existing = Vec::with_capacity(rows.len());
        for row in &rows {
            let data: String = row.try_get("data")?;
            existing.push(serde_json::from_str::<SessionEnrollment>(&data)?);
        }
        let refs: Vec<&SessionEnrollment> = existing.iter().collect();
        check_enrollment_slot(&refs, enrollment, capacity)?;

        upsert(
            &mut tx,
            "enrollment",
            enrollment.id.to_string(),
            Some(enrollment.session_id.to_string()),
            Some(enrollment.student_id.to_string()),
            enrollment,
            0,
        )
        .await?;
        for row in progress {
            upsert(
                &mut tx,
                "progress",
                row.id.to_string(),
                Some(row.session_enrollment_id.to_string()),
                Some(row.session_template_component_id.to_string()),
                row,
                row.version,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_enrollment(&self, id: EnrollmentId) -> Result<Option<SessionEnrollment>> {
        self.load_one("enrollment", id.to_string()).await
    }

    async fn list_enrollments(&self, session_id: SessionId) -> Result<Vec<SessionEnrollment>> {
        let mut out: Vec<SessionEnrollment> =
            self.load_many("enrollment", Some(session_id.to_string())).await?;
        out.sort_by_key(|e| e.enrolled_at);
        Ok(out)
    }

    async fn load_progress(&self, id: ProgressId) -> Result<Option<ComponentProgress>> {
        self.load_one("progress", id.to_string()).await
    }

    async fn list_progress(&self, enrollment_id: EnrollmentId) -> Result<Vec<ComponentProgress>> {
        self.load_many("progress", Some(enrollment_id.to_string())).await
    }

    async fn update_progress(&self, progress: &ComponentProgress, expected_version: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE entities SET data = ?, version = ?, updated_at = ?
            WHERE entity_type = 'progress' AND id = ? AND version = ?",
        )
        .bind(serde_json::to_string(progress)?)
        .bind(progress.version as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(progress.id.to_string())
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let row = sqlx::query("SELECT version FROM entities WHERE entity_type = 'progress' AND id = ?")
            .bind(progress.id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let found: i64 = row.try_get("version")?;
                Err(StorageError::VersionConflict {
                    id: progress.id.to_string(),
                    expected: expected_version,
                    found: found as u64,
                })
            }
            None => Err(StorageError::NotFound(format!("progress {}", progress.id))),
        }
    }

    async fn count_progress_for_component(&self, component_id: ComponentId) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM entities WHERE entity_type = 'progress' AND ref_id = ?",
        )
        .bind(component_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}

#[async_trait]
impl CompletionHistory for SqliteStorage {
    async fn history(&self, student_id: &StudentId) -> Result<StudentHistory> {
        let mut conn = self.pool.acquire().await?;
        Self::load_history(&mut conn, student_id).await
    }

    async fn record_completion(&self, student_id: &StudentId, record: CompletionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut history = Self::load_history(&mut tx, student_id).await?;
        history.completions.push(record);
        Self::store_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_qualification(&self, student_id: &StudentId, qualification: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut history = Self::load_history(&mut tx, student_id).await?;
        if !history.holds_qualification(qualification) {
            history.qualifications.push(qualification.trim().to_string());
        }
        Self::store_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrack_core::{ComponentType, EngineConfig, TemplateType};
    use chrono::Utc;

    fn template() -> SessionTemplate {
        SessionTemplate {
            id: TemplateId::new(),
            name: "Forklift".to_string(),
            code: "FL-1".to_string(),
            description: String::new(),
            template_type: TemplateType::MultiCourse,
            total_duration_minutes: 240,
            estimated_break_minutes: 30,
            max_participants: None,
            is_active: true,
            is_public: false,
            requires_approval: false,
            required_instructors: 1,
            required_rooms: 1,
            required_equipment: vec![],
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
            component_type: ComponentType::Practical,
            sequence_order: order,
            duration_minutes: 60,
            is_break: false,
            break_type: None,
            is_mandatory: true,
            allows_parallel: false,
            instructor_required: true,
            room_required: false,
            equipment_required: true,
            max_participants: None,
            has_assessment: false,
            assessment_type: None,
            min_score_required: None,
            max_attempts: None,
            special_requirements: None,
        }
    }

    #[tokio::test]
    async fn test_components_in_order() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let t = template();
        storage.save_template(&t).await.unwrap();

        let comps = vec![component(t.id, 3), component(t.id, 1), component(t.id, 2)];
        storage
            .write_components(&ComponentChanges {
                template: t.clone(),
                upserts: comps,
                removals: vec![],
            })
            .await
            .unwrap();

        let orders: Vec<u32> = storage
            .list_components(t.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.sequence_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_progress_counts_and_versions() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let t = template();
        let c = component(t.id, 1);

        let enrollment = SessionEnrollment {
            id: EnrollmentId::new(),
            session_id: SessionId::new(),
            student_id: StudentId::new("s-9"),
            template_version: 1,
            progress_ids: vec![],
            enrolled_at: Utc::now(),
        };
        let row = ComponentProgress::new(enrollment.id, &c, EngineConfig::default().default_max_attempts, Utc::now());
        storage.create_enrollment(&enrollment, &[row.clone()], Some(1)).await.unwrap();
        assert_eq!(storage.count_progress_for_component(c.id).await.unwrap(), 1);

        let mut next = row.clone();
        next.version = 1;
        storage.update_progress(&next, 0).await.unwrap();
        assert!(matches!(
            storage.update_progress(&next, 0).await,
            Err(StorageError::VersionConflict { .. })
        ));
    }
}
