//! Read-only completion statistics.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use certrack_core::{
    ComponentProgress, EngineError, EnrollmentId, ProgressStatus, Result, SessionId, TemplateId,
};
use certrack_storage::Storage;

/// Mandatory (enrollment, component) pairs that succeeded, out of all counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRate {
    pub completed: usize,
    pub total: usize,
}

impl CompletionRate {
    /// Fraction in `0.0..=1.0`; `0.0` when nothing is counted.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    fn add(&mut self, other: CompletionRate) {
        self.completed += other.completed;
        self.total += other.total;
    }
}

/// Completion figures for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub name: String,
    pub enrollments: usize,
    /// Enrollments left out because every record is EXCUSED
    pub excluded_enrollments: usize,
    pub completion: CompletionRate,
}

/// Usage of a template across its sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateUsage {
    pub template_id: TemplateId,
    pub sessions: usize,
    pub enrollments: usize,
    /// Pooled over every session
    pub completion: CompletionRate,
    pub per_session: Vec<SessionStats>,
}

/// State of one enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub enrollment_id: EnrollmentId,
    pub status_counts: BTreeMap<String, usize>,
    pub mandatory_total: usize,
    pub mandatory_done: usize,
    /// Every mandatory component is COMPLETED, PASSED or EXCUSED
    pub finished: bool,
}

/// Computes summaries from progress records.
pub struct CompletionAggregator {
    storage: Arc<dyn Storage>,
}

impl CompletionAggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Completion rate of a session's mandatory components.
    pub async fn session_completion_rate(&self, session_id: SessionId) -> Result<CompletionRate> {
        Ok(self.session_stats(session_id).await?.completion)
    }

    /// Full figures for a session.
    pub async fn session_stats(&self, session_id: SessionId) -> Result<SessionStats> {
        let session = self
            .storage
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("session {}", session_id)))?;

        let enrollments = self.storage.list_enrollments(session_id).await?;
        let mut completion = CompletionRate::default();
        let mut excluded = 0;
        for enrollment in &enrollments {
            let rows = self.storage.list_progress(enrollment.id).await?;
            match mandatory_rate(&rows) {
                Some(rate) => completion.add(rate),
                None => excluded += 1,
            }
        }

        debug!(
            session = %session_id,
            completed = completion.completed,
            total = completion.total,
            excluded,
            "computed session completion"
        );
        Ok(SessionStats {
            session_id,
            name: session.name,
            enrollments: enrollments.len(),
            excluded_enrollments: excluded,
            completion,
        })
    }

    /// Sessions, enrollments and pooled completion for a template.
    pub async fn template_usage_stats(&self, template_id: TemplateId) -> Result<TemplateUsage> {
        if self.storage.load_template(template_id).await?.is_none() {
            return Err(EngineError::not_found(format!("template {}", template_id)));
        }

        let mut sessions = self.storage.list_sessions(Some(template_id)).await?;
        sessions.sort_by_key(|s| s.created_at);

        let mut per_session = Vec::with_capacity(sessions.len());
        let mut completion = CompletionRate::default();
        let mut enrollments = 0;
        for session in sessions {
            let stats = self.session_stats(session.id).await?;
            completion.add(stats.completion);
            enrollments += stats.enrollments;
            per_session.push(stats);
        }

        Ok(TemplateUsage {
            template_id,
            sessions: per_session.len(),
            enrollments,
            completion,
            per_session,
        })
    }

    /// Per-status counts for an enrollment.
    pub async fn enrollment_summary(&self, enrollment_id: EnrollmentId) -> Result<EnrollmentSummary> {
        if self.storage.load_enrollment(enrollment_id).await?.is_none() {
            return Err(EngineError::not_found(format!("enrollment {}", enrollment_id)));
        }
        let rows = self.storage.list_progress(enrollment_id).await?;

        let mut status_counts = BTreeMap::new();
        for row in &rows {
            *status_counts.entry(row.status.to_string()).or_insert(0) += 1;
        }
        let mandatory: Vec<&ComponentProgress> = rows.iter().filter(|p| p.is_mandatory).collect();
        let mandatory_done = mandatory
            .iter()
            .filter(|p| p.status.is_success() || p.status == ProgressStatus::Excused)
            .count();

        Ok(EnrollmentSummary {
            enrollment_id,
            status_counts,
            mandatory_total: mandatory.len(),
            mandatory_done,
            finished: mandatory_done == mandatory.len(),
        })
    }
}

// None when every record of the enrollment is EXCUSED.
fn mandatory_rate(rows: &[ComponentProgress]) -> Option<CompletionRate> {
    if !rows.is_empty() && rows.iter().all(|p| p.status == ProgressStatus::Excused) {
        return None;
    }
    let mandatory = rows.iter().filter(|p| p.is_mandatory);
    Some(CompletionRate {
        completed: mandatory.clone().filter(|p| p.status.is_success()).count(),
        total: mandatory.count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ProgressEngine, SessionSpec};
    use certrack_core::StudentId;
    use certrack_storage::MemoryStorage;
    use certrack_templates::{ComponentSpec, TemplateSpec, TemplateStore};

    async fn setup(mandatory: usize) -> (Arc<MemoryStorage>, ProgressEngine, TemplateId) {
        let storage = Arc::new(MemoryStorage::new());
        let templates = TemplateStore::new(storage.clone());
        let tid = templates
            .create_template(TemplateSpec::new("Safety Day", "SD-1", "MULTI_COURSE"))
            .await
            .unwrap()
            .template
            .id;
        for i in 0..mandatory {
            templates
                .add_component(tid, ComponentSpec::new(format!("Step {}", i), "ACTIVITY", 30))
                .await
                .unwrap();
        }
        templates.add_component(tid, ComponentSpec::short_break(10)).await.unwrap();
        (storage.clone(), ProgressEngine::new(storage.clone(), storage), tid)
    }

    async fn finish(engine: &ProgressEngine, rows: &[ComponentProgress], count: usize) {
        for p in rows.iter().filter(|p| p.is_mandatory).take(count) {
            engine.start(p.id).await.unwrap();
            engine.complete(p.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_session_rate_counts_mandatory_pairs() {
        let (storage, engine, tid) = setup(4).await;
        let session = engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let a = engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();
        let b = engine.enroll(&StudentId::new("s-2"), session.id).await.unwrap();

        finish(&engine, &a.progress, 4).await;
        finish(&engine, &b.progress, 2).await;

        let aggregator = CompletionAggregator::new(storage);
        let rate = aggregator.session_completion_rate(session.id).await.unwrap();
        assert_eq!(rate, CompletionRate { completed: 6, total: 8 });
        assert!((rate.rate() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fully_excused_enrollment_excluded() {
        let (storage, engine, tid) = setup(2).await;
        let session = engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let a = engine.enroll(&StudentId::new("s-1"), session.id).await.unwrap();
        let b = engine.enroll(&StudentId::new("s-2"), session.id).await.unwrap();

        finish(&engine, &a.progress, 1).await;
        for p in &b.progress {
            engine.excuse(p.id, Some("illness".into())).await.unwrap();
        }

        let aggregator = CompletionAggregator::new(storage);
        let stats = aggregator.session_stats(session.id).await.unwrap();
        assert_eq!(stats.excluded_enrollments, 1);
        assert_eq!(stats.completion, CompletionRate { completed: 1, total: 2 });

        let summary = aggregator.enrollment_summary(b.enrollment.id).await.unwrap();
        assert!(summary.finished);
        assert_eq!(summary.status_counts.get("EXCUSED"), Some(&3));
    }

    #[tokio::test]
    async fn test_empty_session_rate_is_zero() {
        let (storage, engine, tid) = setup(1).await;
        let session = engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let aggregator = CompletionAggregator::new(storage);
        let rate = aggregator.session_completion_rate(session.id).await.unwrap();
        assert_eq!(rate.total, 0);
        assert_eq!(rate.rate(), 0.0);
    }

    #[tokio::test]
    async fn test_template_usage_pools_sessions() {
        let (storage, engine, tid) = setup(2).await;
        let monday = engine.create_session(tid, SessionSpec::new("Monday")).await.unwrap();
        let tuesday = engine.create_session(tid, SessionSpec::new("Tuesday")).await.unwrap();
        let a = engine.enroll(&StudentId::new("s-1"), monday.id).await.unwrap();
        engine.enroll(&StudentId::new("s-2"), tuesday.id).await.unwrap();
        finish(&engine, &a.progress, 2).await;

        let usage = CompletionAggregator::new(storage).template_usage_stats(tid).await.unwrap();
        assert_eq!(usage.sessions, 2);
        assert_eq!(usage.enrollments, 2);
        assert_eq!(usage.completion, CompletionRate { completed: 2, total: 4 });
        assert_eq!(usage.per_session.len(), 2);
    }
}
