//! Prerequisite edge management and eligibility checks against storage.

use std::sync::Arc;
use certrack_core::{
    CourseId, CoursePrerequisite, Eligibility, EngineError, PrerequisiteId, Result, StudentId,
};
use certrack_storage::{CompletionHistory, Storage};
use tracing::{info, warn};

use crate::graph::PrerequisiteGraph;
use crate::validator::{EvaluationContext, PrerequisiteValidator};

/// Manages prerequisite edges and answers eligibility questions.
pub struct PrerequisiteRegistry {
    storage: Arc<dyn Storage>,
    history: Arc<dyn CompletionHistory>,
    validator: PrerequisiteValidator,
}

impl PrerequisiteRegistry {
    /// Create a registry over an edge store and a history source.
    pub fn new(storage: Arc<dyn Storage>, history: Arc<dyn CompletionHistory>) -> Self {
        Self {
            storage,
            history,
            validator: PrerequisiteValidator::new(),
        }
    }

    /// Add an edge.
    ///
    /// Rejects self-edges and negative or non-finite minimum scores with
    /// `Validation`, and edges that would close a blocking cycle with `Conflict`.
    pub async fn add_edge(&self, edge: CoursePrerequisite) -> Result<CoursePrerequisite> {
        if edge.course_id == edge.prerequisite_course_id {
            return Err(EngineError::validation(format!(
                "course {} cannot be its own prerequisite",
                edge.course_id
            )));
        }
        if let Some(min) = edge.min_score_required {
            if !min.is_finite() || min < 0.0 {
                return Err(EngineError::validation(format!(
                    "min_score_required must be non-negative, got {}",
                    min
                )));
            }
        }

        let existing = self.storage.list_prerequisites(None).await?;
        reject_cycle(&existing, &edge)?;

        self.storage.save_prerequisite(&edge).await?;
        info!(
            course = %edge.course_id,
            prerequisite = %edge.prerequisite_course_id,
            kind = %edge.prerequisite_type,
            "added prerequisite"
        );
        Ok(edge)
    }

    /// Activate or deactivate an edge.
    ///
    /// Reactivating an edge that would close a blocking cycle with the
    /// currently active edges is a `Conflict`; the edge stays inactive.
    pub async fn set_active(&self, id: PrerequisiteId, active: bool) -> Result<CoursePrerequisite> {
        let mut edge = self.find(id).await?;
        if active && !edge.is_active {
            let others: Vec<CoursePrerequisite> = self
                .storage
                .list_prerequisites(None)
                .await?
                .into_iter()
                .filter(|e| e.id != id)
                .collect();
            reject_cycle(&others, &edge)?;
        }
        edge.is_active = active;
        self.storage.save_prerequisite(&edge).await?;
        Ok(edge)
    }

    /// Remove an edge.
    pub async fn remove_edge(&self, id: PrerequisiteId) -> Result<()> {
        self.find(id).await?;
        self.storage.delete_prerequisite(id).await?;
        Ok(())
    }

    /// Edges gating a course.
    pub async fn edges_for(&self, course_id: &CourseId) -> Result<Vec<CoursePrerequisite>> {
        Ok(self.storage.list_prerequisites(Some(course_id)).await?)
    }

    /// Evaluate a student's eligibility for a set of courses delivered together.
    ///
    /// History is read fresh on every call.
    pub async fn check(
        &self,
        student_id: &StudentId,
        courses: &[CourseId],
        now: certrack_core::Time,
    ) -> Result<Eligibility> {
        let history = self.history.history(student_id).await?;
        let mut edges = Vec::new();
        for course in courses {
            edges.extend(self.storage.list_prerequisites(Some(course)).await?);
        }

        let ctx = EvaluationContext {
            history: &history,
            concurrent_courses: courses,
            now,
        };
        Ok(self.validator.evaluate_all(courses, &edges, &ctx))
    }

    async fn find(&self, id: PrerequisiteId) -> Result<CoursePrerequisite> {
        self.storage
            .list_prerequisites(None)
            .await?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| EngineError::not_found(format!("prerequisite {}", id)))
    }
}

fn reject_cycle(existing: &[CoursePrerequisite], edge: &CoursePrerequisite) -> Result<()> {
    if let Some(cycle) = PrerequisiteGraph::new(existing).cycle_with(edge) {
        let path: Vec<String> = cycle.iter().map(|c| c.to_string()).collect();
        warn!(course = %edge.course_id, "rejected cyclic prerequisite");
        return Err(EngineError::conflict(format!(
            "prerequisite cycle: {}",
            path.join(" -> ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrack_core::{CompletionRecord, PrerequisiteType};
    use certrack_storage::MemoryStorage;
    use chrono::Utc;

    fn registry() -> (PrerequisiteRegistry, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (PrerequisiteRegistry::new(storage.clone(), storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let (registry, _) = registry();
        let err = registry
            .add_edge(CoursePrerequisite::new("A", "A", PrerequisiteType::Required))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let (registry, _) = registry();
        registry
            .add_edge(CoursePrerequisite::new("B", "A", PrerequisiteType::Required))
            .await
            .unwrap();
        let err = registry
            .add_edge(CoursePrerequisite::new("A", "B", PrerequisiteType::Concurrent))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reactivation_cannot_close_cycle() {
        let (registry, _) = registry();
        let first = registry
            .add_edge(CoursePrerequisite::new("B", "A", PrerequisiteType::Required))
            .await
            .unwrap();
        registry.set_active(first.id, false).await.unwrap();
        registry
            .add_edge(CoursePrerequisite::new("A", "B", PrerequisiteType::Required))
            .await
            .unwrap();

        let err = registry.set_active(first.id, true).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        let stored = registry.edges_for(&CourseId::new("B")).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_active);

        // Deactivating is never blocked, and an already active edge can be re-saved.
        let second = registry.edges_for(&CourseId::new("A")).await.unwrap()[0].id;
        assert!(registry.set_active(second, true).await.unwrap().is_active);
        registry.set_active(second, false).await.unwrap();
        assert!(registry.set_active(first.id, true).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_check_reads_fresh_history() {
        let (registry, storage) = registry();
        registry
            .add_edge(CoursePrerequisite::new("ADV", "BASIC", PrerequisiteType::Required))
            .await
            .unwrap();
        let student = StudentId::new("s-1");

        let before = registry.check(&student, &[CourseId::new("ADV")], Utc::now()).await.unwrap();
        assert!(!before.eligible);

        storage
            .record_completion(
                &student,
                CompletionRecord {
                    course_id: CourseId::new("BASIC"),
                    passed: true,
                    score: None,
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let after = registry.check(&student, &[CourseId::new("ADV")], Utc::now()).await.unwrap();
        assert!(after.eligible);
    }

    #[tokio::test]
    async fn test_deactivated_edge_stops_blocking() {
        let (registry, _) = registry();
        let edge = registry
            .add_edge(CoursePrerequisite::new("ADV", "BASIC", PrerequisiteType::Required))
            .await
            .unwrap();
        registry.set_active(edge.id, false).await.unwrap();

        let result = registry
            .check(&StudentId::new("s-2"), &[CourseId::new("ADV")], Utc::now())
            .await
            .unwrap();
        assert!(result.eligible);

        registry.remove_edge(edge.id).await.unwrap();
        assert!(registry.edges_for(&CourseId::new("ADV")).await.unwrap().is_empty());
    }
}
