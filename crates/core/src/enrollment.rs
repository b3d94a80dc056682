//! Enrollments and per-component progress records.

use serde::{Deserialize, Serialize};
use crate::id::{ComponentId, EnrollmentId, ProgressId, SessionId, StudentId};
use crate::template::TemplateComponent;
use crate::wire::wire_enum;
use crate::Time;

wire_enum! {
    /// Where a student stands on one component.
    pub enum ProgressStatus {
        /// Nothing recorded yet
        NotStarted => "NOT_STARTED",
        /// Started, not yet closed
        InProgress => "IN_PROGRESS",
        /// Non-assessment component finished
        Completed => "COMPLETED",
        /// Assessment passed
        Passed => "PASSED",
        /// Assessment failed
        Failed => "FAILED",
        /// Skipped by an administrator
        Skipped => "SKIPPED",
        /// Excused by an administrator
        Excused => "EXCUSED",
    }
}

impl ProgressStatus {
    /// Whether `self -> next` appears in the transition table.
    ///
    /// Guards that depend on the record (mandatory flag, attempt budget,
    /// assessment kind) are checked by the engine on top of this table.
    pub fn can_transition_to(self, next: ProgressStatus) -> bool {
        use ProgressStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (InProgress, Completed)
                | (InProgress, Passed)
                | (InProgress, Failed)
                | (NotStarted, Skipped)
                | (NotStarted, Excused)
                | (InProgress, Skipped)
                | (InProgress, Excused)
                | (Failed, InProgress)
        )
    }

    /// Statuses that close the component (possibly reopened by a retry from FAILED).
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Passed | Self::Failed | Self::Skipped | Self::Excused
        )
    }

    /// Counts as done for completion accounting.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::Passed)
    }
}

wire_enum! {
    /// Attendance axis, independent from [`ProgressStatus`].
    pub enum AttendanceStatus {
        /// Enrolled, nothing recorded
        Registered => "REGISTERED",
        /// Attended
        Present => "PRESENT",
        /// Did not attend
        Absent => "ABSENT",
        /// Arrived late
        Late => "LATE",
        /// Left early
        EarlyDeparture => "EARLY_DEPARTURE",
        /// Absence excused
        Excused => "EXCUSED",
    }
}

/// A student's registration into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnrollment {
    /// Unique identifier
    pub id: EnrollmentId,

    /// Session enrolled into
    pub session_id: SessionId,

    /// Enrolled student
    pub student_id: StudentId,

    /// Template version the progress rows were built from
    pub template_version: u32,

    /// Progress rows in component order
    pub progress_ids: Vec<ProgressId>,

    /// Enrollment timestamp
    pub enrolled_at: Time,
}

/// Per-enrollment, per-component progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentProgress {
    /// Unique identifier
    pub id: ProgressId,

    /// Owning enrollment
    pub session_enrollment_id: EnrollmentId,

    /// Referenced (not owned) component
    pub session_template_component_id: ComponentId,

    /// Copied from the pinned component
    pub is_mandatory: bool,

    /// Copied from the pinned component
    pub has_assessment: bool,

    /// Copied from the pinned component
    pub min_score_required: Option<f32>,

    /// Attempt budget resolved at enrollment
    pub max_attempts: u32,

    /// Current status; always explicit
    pub status: ProgressStatus,

    /// Set when the current attempt started
    pub start_time: Option<Time>,
    /// Set when the record was last closed
    pub end_time: Option<Time>,
    /// Minutes between start and close, when both are known
    pub duration_actual_minutes: Option<i64>,

    /// Latest score
    pub score: Option<f32>,

    /// Derived from score and pass mark
    pub passed: Option<bool>,

    /// Scored attempts so far
    pub attempts: u32,

    /// Attendance axis
    pub attendance_status: AttendanceStatus,

    /// Share of the component attended, 0..=100
    pub attendance_percentage: Option<f32>,
    /// Instructor's rating, 0..=100
    pub participation_score: Option<f32>,
    /// Free text from the instructor
    pub instructor_notes: Option<String>,
    /// Free text from the student
    pub participant_feedback: Option<String>,
    /// Notes written when the component was closed
    pub completion_notes: Option<String>,

    /// Reason given when skipping or excusing a mandatory component
    pub excuse_reason: Option<String>,

    /// Optimistic concurrency counter, bumped on every write
    pub version: u64,

    /// Last update timestamp
    pub updated_at: Time,
}

impl ComponentProgress {
    /// Fresh record for a pinned component.
    pub fn new(
        enrollment_id: EnrollmentId,
        component: &TemplateComponent,
        default_max_attempts: u32,
        now: Time,
    ) -> Self {
        Self {
            id: ProgressId::new(),
            session_enrollment_id: enrollment_id,
            session_template_component_id: component.id,
            is_mandatory: component.is_mandatory,
            has_assessment: component.has_assessment,
            min_score_required: component.min_score_required,
            max_attempts: component.effective_max_attempts(default_max_attempts),
            status: ProgressStatus::NotStarted,
            start_time: None,
            end_time: None,
            duration_actual_minutes: None,
            score: None,
            passed: None,
            attempts: 0,
            attendance_status: AttendanceStatus::Registered,
            attendance_percentage: None,
            participation_score: None,
            instructor_notes: None,
            participant_feedback: None,
            completion_notes: None,
            excuse_reason: None,
            version: 0,
            updated_at: now,
        }
    }

    /// Whether the attempt budget is used up.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Whether a score passes this component.
    pub fn score_passes(&self, score: f32) -> bool {
        score >= self.min_score_required.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProgressStatus::*;

    #[test]
    fn test_transition_table() {
        let allowed = [
            (NotStarted, InProgress),
            (InProgress, Completed),
            (InProgress, Passed),
            (InProgress, Failed),
            (NotStarted, Skipped),
            (NotStarted, Excused),
            (InProgress, Skipped),
            (InProgress, Excused),
            (Failed, InProgress),
        ];

        for from in ProgressStatus::ALL {
            for to in ProgressStatus::ALL {
                let expected = allowed.contains(&(*from, *to));
                assert_eq!(
                    from.can_transition_to(*to),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_completed_never_reopens() {
        assert!(!Completed.can_transition_to(NotStarted));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Passed.can_transition_to(InProgress));
    }

    #[test]
    fn test_success_statuses() {
        assert!(Completed.is_success());
        assert!(Passed.is_success());
        assert!(!Excused.is_success());
        assert!(!Failed.is_success());
    }
}
