//! Prerequisite evaluation over a completion-history snapshot.

use chrono::Months;
use certrack_core::{
    CompletionRecord, CourseId, CoursePrerequisite, Eligibility, MissingRequirement,
    PrerequisiteType, StudentHistory, Time, UnmetReason,
};
use tracing::debug;

/// Inputs that do not change between the courses of one enrollment.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a> {
    /// Student completion history snapshot
    pub history: &'a StudentHistory,

    /// Courses delivered by the same session (satisfy CONCURRENT edges)
    pub concurrent_courses: &'a [CourseId],

    /// Reference time for validity windows
    pub now: Time,
}

/// Evaluates course prerequisites.
///
/// All evaluation is pure: the same history, edges and `now` always give the
/// same answer, so results must not be cached across enrollments.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteValidator;

impl PrerequisiteValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `target` against `edges`.
    ///
    /// Edges for other courses and inactive edges are ignored, so the full
    /// edge set may be passed in.
    pub fn evaluate(
        &self,
        target: &CourseId,
        edges: &[CoursePrerequisite],
        ctx: &EvaluationContext<'_>,
    ) -> Eligibility {
        let relevant = edges
            .iter()
            .filter(|e| e.is_active && &e.course_id == target);

        let mut missing = Vec::new();
        let mut advisories = Vec::new();
        let mut alternatives: Vec<&CoursePrerequisite> = Vec::new();

        for edge in relevant {
            match edge.prerequisite_type {
                PrerequisiteType::Required => {
                    if let Err(reason) = self.check_edge(edge, ctx) {
                        missing.push(MissingRequirement::Course {
                            for_course: target.clone(),
                            course_id: edge.prerequisite_course_id.clone(),
                            prerequisite_type: edge.prerequisite_type,
                            reason,
                        });
                    }
                }
                PrerequisiteType::Concurrent => {
                    let in_session = ctx.concurrent_courses.contains(&edge.prerequisite_course_id);
                    if !in_session {
                        if let Err(reason) = self.check_edge(edge, ctx) {
                            missing.push(MissingRequirement::Course {
                                for_course: target.clone(),
                                course_id: edge.prerequisite_course_id.clone(),
                                prerequisite_type: edge.prerequisite_type,
                                reason,
                            });
                        }
                    }
                }
                PrerequisiteType::Recommended => {
                    if self.check_edge(edge, ctx).is_err()
                        && !advisories.contains(&edge.prerequisite_course_id)
                    {
                        advisories.push(edge.prerequisite_course_id.clone());
                    }
                }
                PrerequisiteType::Alternative => alternatives.push(edge),
            }
        }

        // Every ALTERNATIVE edge of the target forms one OR-group.
        if !alternatives.is_empty() && !alternatives.iter().any(|e| self.check_edge(e, ctx).is_ok()) {
            let mut options: Vec<CourseId> = Vec::new();
            let mut qualifications: Vec<String> = Vec::new();
            for e in &alternatives {
                if !options.contains(&e.prerequisite_course_id) {
                    options.push(e.prerequisite_course_id.clone());
                }
                if let Some(q) = &e.alternative_qualification {
                    if !qualifications.contains(q) {
                        qualifications.push(q.clone());
                    }
                }
            }
            missing.push(MissingRequirement::AnyOf {
                for_course: target.clone(),
                options,
                qualifications,
            });
        }

        debug!(
            course = %target,
            student = %ctx.history.student_id,
            missing = missing.len(),
            advisories = advisories.len(),
            "evaluated prerequisites"
        );

        Eligibility {
            eligible: missing.is_empty(),
            missing,
            advisories,
        }
    }

    /// Evaluate several target courses and merge the results.
    pub fn evaluate_all(
        &self,
        targets: &[CourseId],
        edges: &[CoursePrerequisite],
        ctx: &EvaluationContext<'_>,
    ) -> Eligibility {
        let mut result = Eligibility::eligible();
        for target in targets {
            result.merge(self.evaluate(target, edges, ctx));
        }
        result
    }

    /// Whether the student's history satisfies one edge.
    ///
    /// A held `alternative_qualification` satisfies the edge outright.
    /// Otherwise some completion must be passed, meet the minimum score and
    /// fall inside the validity window. The reported reason is the closest
    /// the student came.
    pub fn check_edge(
        &self,
        edge: &CoursePrerequisite,
        ctx: &EvaluationContext<'_>,
    ) -> Result<(), UnmetReason> {
        if let Some(q) = &edge.alternative_qualification {
            if ctx.history.holds_qualification(q) {
                return Ok(());
            }
        }

        let records: Vec<&CompletionRecord> = ctx
            .history
            .completions
            .iter()
            .filter(|r| r.course_id == edge.prerequisite_course_id)
            .collect();
        if records.is_empty() {
            return Err(UnmetReason::NotCompleted);
        }

        let passed: Vec<&CompletionRecord> = records.into_iter().filter(|r| r.passed).collect();
        if passed.is_empty() {
            return Err(UnmetReason::NotPassed);
        }

        let scored: Vec<&CompletionRecord> = match edge.min_score_required {
            Some(min) => {
                let ok: Vec<_> = passed
                    .iter()
                    .copied()
                    .filter(|r| r.score.map_or(false, |s| s >= min))
                    .collect();
                if ok.is_empty() {
                    let best = passed
                        .iter()
                        .filter_map(|r| r.score)
                        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))));
                    return Err(UnmetReason::ScoreBelowMinimum { required: min, best });
                }
                ok
            }
            None => passed,
        };

        let Some(months) = edge.validity_months else {
            return Ok(());
        };

        let mut latest: Option<Time> = None;
        for r in &scored {
            if is_within_validity(r.completed_at, months, ctx.now) {
                return Ok(());
            }
            latest = Some(latest.map_or(r.completed_at, |l| l.max(r.completed_at)));
        }
        Err(UnmetReason::Expired {
            completed_at: latest.unwrap_or(ctx.now),
            validity_months: months,
        })
    }
}

/// Whether a completion at `completed_at` is still valid at `now`.
pub fn is_within_validity(completed_at: Time, validity_months: u32, now: Time) -> bool {
    match completed_at.checked_add_months(Months::new(validity_months)) {
        Some(expires) => now <= expires,
        None => true,
    }
}
