//! Status transitions on a single progress record.
//!
//! Every function validates first and mutates only on success, so a
//! rejected transition leaves the record exactly as it was.

use certrack_core::{AttendanceStatus, ComponentProgress, EngineError, ProgressStatus, Result, Time};

/// NOT_STARTED -> IN_PROGRESS. On a FAILED record this is a retry.
pub fn start(p: &mut ComponentProgress, now: Time) -> Result<()> {
    match p.status {
        ProgressStatus::NotStarted => {
            p.status = ProgressStatus::InProgress;
            p.start_time = Some(now);
            Ok(())
        }
        ProgressStatus::Failed => retry(p, now),
        from => Err(invalid(from, ProgressStatus::InProgress)),
    }
}

/// IN_PROGRESS -> COMPLETED for components without an assessment.
pub fn complete(p: &mut ComponentProgress, now: Time) -> Result<()> {
    if p.status != ProgressStatus::InProgress || p.has_assessment {
        return Err(invalid(p.status, ProgressStatus::Completed));
    }
    p.status = ProgressStatus::Completed;
    close(p, now);
    Ok(())
}

/// IN_PROGRESS -> PASSED | FAILED on an assessment component.
pub fn record_score(p: &mut ComponentProgress, score: f32, now: Time) -> Result<()> {
    if !score.is_finite() || score < 0.0 {
        return Err(EngineError::validation(format!("score must be non-negative, got {}", score)));
    }
    if !p.has_assessment {
        return Err(EngineError::validation("component has no assessment to score"));
    }

    let passed = p.score_passes(score);
    let target = if passed { ProgressStatus::Passed } else { ProgressStatus::Failed };
    if p.status != ProgressStatus::InProgress {
        return Err(after_close(p, target));
    }
    if p.attempts_exhausted() {
        return Err(exhausted(p));
    }

    p.score = Some(score);
    p.passed = Some(passed);
    p.attempts += 1;
    p.status = target;
    close(p, now);
    Ok(())
}

/// FAILED -> IN_PROGRESS while attempts remain.
pub fn retry(p: &mut ComponentProgress, now: Time) -> Result<()> {
    if p.status != ProgressStatus::Failed {
        return Err(after_close(p, ProgressStatus::InProgress));
    }
    if p.attempts_exhausted() {
        return Err(exhausted(p));
    }
    p.status = ProgressStatus::InProgress;
    p.passed = None;
    p.start_time = Some(now);
    p.end_time = None;
    p.duration_actual_minutes = None;
    Ok(())
}

/// Administrative close to SKIPPED or EXCUSED.
///
/// On a mandatory component the move is only in the table when a
/// non-blank reason is given; without one it is an invalid transition.
pub fn waive(p: &mut ComponentProgress, target: ProgressStatus, reason: Option<String>, now: Time) -> Result<()> {
    debug_assert!(matches!(target, ProgressStatus::Skipped | ProgressStatus::Excused));
    if !p.status.can_transition_to(target) {
        return Err(invalid(p.status, target));
    }
    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if p.is_mandatory && reason.is_none() {
        return Err(invalid(p.status, target));
    }
    p.status = target;
    p.excuse_reason = reason;
    close(p, now);
    Ok(())
}

/// Update the attendance axis.
///
/// With `enforce_excused`, EXCUSED attendance on a mandatory component also
/// moves an open record to EXCUSED and is refused on a graded or completed one.
pub fn record_attendance(
    p: &mut ComponentProgress,
    attendance: AttendanceStatus,
    percentage: Option<f32>,
    enforce_excused: bool,
    now: Time,
) -> Result<()> {
    if let Some(pct) = percentage {
        check_percentage("attendance_percentage", pct)?;
    }

    let force_excused = enforce_excused && attendance == AttendanceStatus::Excused && p.is_mandatory;
    if force_excused {
        match p.status {
            ProgressStatus::NotStarted | ProgressStatus::InProgress => {
                p.status = ProgressStatus::Excused;
                close(p, now);
            }
            ProgressStatus::Excused => {}
            other => {
                return Err(EngineError::conflict(format!(
                    "cannot excuse attendance on a {} mandatory component",
                    other
                )))
            }
        }
    }

    p.attendance_status = attendance;
    if percentage.is_some() {
        p.attendance_percentage = percentage;
    }
    Ok(())
}

/// Free-text and participation fields. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgressNotes {
    pub instructor_notes: Option<String>,
    pub participant_feedback: Option<String>,
    pub completion_notes: Option<String>,
    pub participation_score: Option<f32>,
}

/// Apply notes to a record.
pub fn record_notes(p: &mut ComponentProgress, notes: ProgressNotes) -> Result<()> {
    if let Some(score) = notes.participation_score {
        check_percentage("participation_score", score)?;
        p.participation_score = Some(score);
    }
    if notes.instructor_notes.is_some() {
        p.instructor_notes = notes.instructor_notes;
    }
    if notes.participant_feedback.is_some() {
        p.participant_feedback = notes.participant_feedback;
    }
    if notes.completion_notes.is_some() {
        p.completion_notes = notes.completion_notes;
    }
    Ok(())
}

fn close(p: &mut ComponentProgress, now: Time) {
    p.end_time = Some(now);
    p.duration_actual_minutes = p.start_time.map(|start| (now - start).num_minutes());
}

fn check_percentage(field: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(EngineError::validation(format!("{} must be within 0..=100, got {}", field, value)));
    }
    Ok(())
}

fn invalid(from: ProgressStatus, to: ProgressStatus) -> EngineError {
    EngineError::InvalidTransition { from, to }
}

fn exhausted(p: &ComponentProgress) -> EngineError {
    EngineError::AttemptsExhausted {
        attempts: p.attempts,
        max_attempts: p.max_attempts,
    }
}

// A graded record with no attempts left reports exhaustion rather than a
// table violation.
fn after_close(p: &ComponentProgress, to: ProgressStatus) -> EngineError {
    let graded = matches!(p.status, ProgressStatus::Passed | ProgressStatus::Failed);
    if graded && p.attempts_exhausted() {
        exhausted(p)
    } else {
        invalid(p.status, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrack_core::{ComponentId, ComponentType, EnrollmentId, TemplateComponent, TemplateId};
    use chrono::{Duration, Utc};

    fn component(mandatory: bool, min_score: Option<f32>, max_attempts: Option<u32>) -> TemplateComponent {
        TemplateComponent {
            id: ComponentId::new(),
            session_template_id: TemplateId::new(),
            name: "step".into(),
            course_id: None,
            component_type: if min_score.is_some() { ComponentType::Assessment } else { ComponentType::Activity },
            sequence_order: 1,
            duration_minutes: 60,
            is_break: false,
            break_type: None,
            is_mandatory: mandatory,
            allows_parallel: false,
            instructor_required: false,
            room_required: false,
            equipment_required: false,
            max_participants: None,
            has_assessment: min_score.is_some(),
            assessment_type: None,
            min_score_required: min_score,
            max_attempts,
            special_requirements: None,
        }
    }

    fn record(mandatory: bool, min_score: Option<f32>, max_attempts: Option<u32>) -> ComponentProgress {
        ComponentProgress::new(EnrollmentId::new(), &component(mandatory, min_score, max_attempts), 3, Utc::now())
    }

    #[test]
    fn test_optional_component_skips_directly() {
        let mut p = record(false, None, None);
        waive(&mut p, ProgressStatus::Skipped, None, Utc::now()).unwrap();
        assert_eq!(p.status, ProgressStatus::Skipped);
        assert!(p.end_time.is_some());
        assert!(p.duration_actual_minutes.is_none());
    }

    #[test]
    fn test_mandatory_skip_needs_reason() {
        let mut p = record(true, None, None);
        let before = p.clone();
        let err = waive(&mut p, ProgressStatus::Skipped, Some("  ".into()), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: ProgressStatus::NotStarted,
                to: ProgressStatus::Skipped
            }
        ));
        let err = waive(&mut p, ProgressStatus::Excused, None, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(p, before);

        waive(&mut p, ProgressStatus::Excused, Some("medical".into()), Utc::now()).unwrap();
        assert_eq!(p.status, ProgressStatus::Excused);
        assert_eq!(p.excuse_reason.as_deref(), Some("medical"));
    }

    #[test]
    fn test_retry_budget() {
        let mut p = record(true, Some(80.0), Some(2));
        let t0 = Utc::now();
        start(&mut p, t0).unwrap();
        record_score(&mut p, 65.0, t0 + Duration::minutes(50)).unwrap();
        assert_eq!(p.status, ProgressStatus::Failed);
        assert_eq!(p.attempts, 1);
        assert_eq!(p.duration_actual_minutes, Some(50));

        retry(&mut p, t0 + Duration::minutes(60)).unwrap();
        assert_eq!(p.end_time, None);
        record_score(&mut p, 85.0, t0 + Duration::minutes(90)).unwrap();
        assert_eq!(p.status, ProgressStatus::Passed);
        assert_eq!(p.attempts, 2);
        assert_eq!(p.passed, Some(true));
        assert_eq!(p.duration_actual_minutes, Some(30));

        let before = p.clone();
        let err = retry(&mut p, Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::AttemptsExhausted { attempts: 2, max_attempts: 2 });
        let err = record_score(&mut p, 99.0, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::AttemptsExhausted { .. }));
        assert_eq!(p, before);
    }

    #[test]
    fn test_score_on_closed_record_is_rejected() {
        let mut p = record(true, Some(50.0), Some(3));
        start(&mut p, Utc::now()).unwrap();
        record_score(&mut p, 70.0, Utc::now()).unwrap();

        let before = p.clone();
        let err = record_score(&mut p, 10.0, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                from: ProgressStatus::Passed,
                to: ProgressStatus::Failed
            }
        );
        assert_eq!(p, before);
    }

    #[test]
    fn test_complete_rejects_assessment() {
        let mut p = record(true, Some(50.0), None);
        start(&mut p, Utc::now()).unwrap();
        assert!(matches!(complete(&mut p, Utc::now()), Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn test_illegal_moves_leave_record_unchanged() {
        let mut p = record(false, None, None);
        start(&mut p, Utc::now()).unwrap();
        complete(&mut p, Utc::now()).unwrap();

        let before = p.clone();
        assert!(start(&mut p, Utc::now()).is_err());
        assert!(complete(&mut p, Utc::now()).is_err());
        assert!(retry(&mut p, Utc::now()).is_err());
        assert!(waive(&mut p, ProgressStatus::Skipped, Some("late".into()), Utc::now()).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn test_excused_attendance_forces_status() {
        let mut p = record(true, None, None);
        record_attendance(&mut p, AttendanceStatus::Excused, None, true, Utc::now()).unwrap();
        assert_eq!(p.status, ProgressStatus::Excused);
        assert_eq!(p.attendance_status, AttendanceStatus::Excused);

        let mut done = record(true, None, None);
        start(&mut done, Utc::now()).unwrap();
        complete(&mut done, Utc::now()).unwrap();
        let err = record_attendance(&mut done, AttendanceStatus::Excused, None, true, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(done.attendance_status, AttendanceStatus::Registered);

        record_attendance(&mut done, AttendanceStatus::Excused, None, false, Utc::now()).unwrap();
        assert_eq!(done.status, ProgressStatus::Completed);
    }

    #[test]
    fn test_attendance_percentage_bounds() {
        let mut p = record(false, None, None);
        let err = record_attendance(&mut p, AttendanceStatus::Present, Some(120.0), true, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        record_attendance(&mut p, AttendanceStatus::Late, Some(75.0), true, Utc::now()).unwrap();
        assert_eq!(p.attendance_percentage, Some(75.0));
    }
}
