//! Course prerequisite edges and student completion history.

use serde::{Deserialize, Serialize};
use crate::id::{CourseId, PrerequisiteId, StudentId};
use crate::wire::wire_enum;
use crate::Time;

wire_enum! {
    /// How a prerequisite edge constrains enrollment.
    pub enum PrerequisiteType {
        /// Must be completed beforehand
        Required => "REQUIRED",
        /// Advisory only
        Recommended => "RECOMMENDED",
        /// One of the alternatives for a course must be completed
        Alternative => "ALTERNATIVE",
        /// May be taken in the same session
        Concurrent => "CONCURRENT",
    }
}

/// Directed edge `course_id -> prerequisite_course_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoursePrerequisite {
    /// Unique identifier
    pub id: PrerequisiteId,

    /// Course being gated
    pub course_id: CourseId,

    /// Course that must come first
    pub prerequisite_course_id: CourseId,

    /// Edge semantics
    pub prerequisite_type: PrerequisiteType,

    /// Minimum score on the prerequisite
    pub min_score_required: Option<f32>,

    /// How long a completion stays valid
    pub validity_months: Option<u32>,

    /// Non-course qualification accepted instead of the prerequisite course
    pub alternative_qualification: Option<String>,

    /// Inactive edges are ignored
    pub is_active: bool,
}

impl CoursePrerequisite {
    /// Create an active edge with no score, validity or qualification constraints.
    pub fn new(
        course_id: impl Into<CourseId>,
        prerequisite_course_id: impl Into<CourseId>,
        prerequisite_type: PrerequisiteType,
    ) -> Self {
        Self {
            id: PrerequisiteId::new(),
            course_id: course_id.into(),
            prerequisite_course_id: prerequisite_course_id.into(),
            prerequisite_type,
            min_score_required: None,
            validity_months: None,
            alternative_qualification: None,
            is_active: true,
        }
    }
}

/// One finished course in a student's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Completed course
    pub course_id: CourseId,

    /// Whether the course was passed
    pub passed: bool,

    /// Recorded score
    pub score: Option<f32>,

    /// When it was completed
    pub completed_at: Time,
}

/// Snapshot of everything a student has completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentHistory {
    /// Whose history this is
    pub student_id: StudentId,

    /// Course completions
    pub completions: Vec<CompletionRecord>,

    /// Free-text qualifications held outside the course catalog
    pub qualifications: Vec<String>,
}

impl StudentHistory {
    /// Empty history for a student.
    pub fn new(student_id: StudentId) -> Self {
        Self {
            student_id,
            completions: Vec::new(),
            qualifications: Vec::new(),
        }
    }

    /// Whether the student holds a qualification (case-insensitive).
    pub fn holds_qualification(&self, qualification: &str) -> bool {
        let wanted = qualification.trim();
        self.qualifications
            .iter()
            .any(|q| q.trim().eq_ignore_ascii_case(wanted))
    }
}

/// Why a single prerequisite course is not satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnmetReason {
    /// No completion record at all
    NotCompleted,
    /// Completed but not passed
    NotPassed,
    /// Best passing score is below the minimum
    ScoreBelowMinimum {
        /// Required minimum
        required: f32,
        /// Best recorded score, if any
        best: Option<f32>,
    },
    /// Every qualifying completion is older than the validity window
    Expired {
        /// Most recent qualifying completion
        completed_at: Time,
        /// Validity window
        validity_months: u32,
    },
}

impl std::fmt::Display for UnmetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmetReason::NotCompleted => write!(f, "not completed"),
            UnmetReason::NotPassed => write!(f, "not passed"),
            UnmetReason::ScoreBelowMinimum { required, best: Some(best) } => {
                write!(f, "score {} below required {}", best, required)
            }
            UnmetReason::ScoreBelowMinimum { required, best: None } => {
                write!(f, "no score recorded, {} required", required)
            }
            UnmetReason::Expired { completed_at, validity_months } => write!(
                f,
                "completion from {} expired after {} months",
                completed_at.format("%Y-%m-%d"),
                validity_months
            ),
        }
    }
}

/// One unmet requirement reported back for remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "requirement", rename_all = "snake_case")]
pub enum MissingRequirement {
    /// A REQUIRED or CONCURRENT edge is not satisfied
    Course {
        /// Course being enrolled into
        for_course: CourseId,
        /// Course that is missing
        course_id: CourseId,
        /// Edge type
        prerequisite_type: PrerequisiteType,
        /// Why
        reason: UnmetReason,
    },
    /// None of the ALTERNATIVE edges for a course is satisfied
    AnyOf {
        /// Course being enrolled into
        for_course: CourseId,
        /// Acceptable courses
        options: Vec<CourseId>,
        /// Acceptable non-course qualifications
        qualifications: Vec<String>,
    },
}

impl MissingRequirement {
    /// Course the requirement gates.
    pub fn for_course(&self) -> &CourseId {
        match self {
            MissingRequirement::Course { for_course, .. }
            | MissingRequirement::AnyOf { for_course, .. } => for_course,
        }
    }

    /// Courses that would discharge the requirement.
    pub fn courses(&self) -> Vec<&CourseId> {
        match self {
            MissingRequirement::Course { course_id, .. } => vec![course_id],
            MissingRequirement::AnyOf { options, .. } => options.iter().collect(),
        }
    }
}

impl std::fmt::Display for MissingRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingRequirement::Course { for_course, course_id, prerequisite_type, reason } => {
                write!(f, "{} needs {} {} ({})", for_course, prerequisite_type, course_id, reason)
            }
            MissingRequirement::AnyOf { for_course, options, qualifications } => {
                let mut all: Vec<String> = options.iter().map(|c| c.to_string()).collect();
                all.extend(qualifications.iter().cloned());
                write!(f, "{} needs one of [{}]", for_course, all.join(", "))
            }
        }
    }
}

/// Outcome of a prerequisite evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    /// No blocking requirement is unmet
    pub eligible: bool,

    /// Every blocking requirement that is unmet
    pub missing: Vec<MissingRequirement>,

    /// Recommended courses not yet completed
    pub advisories: Vec<CourseId>,
}

impl Eligibility {
    /// Eligible result with no advisories.
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            missing: Vec::new(),
            advisories: Vec::new(),
        }
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: Eligibility) {
        self.missing.extend(other.missing);
        for course in other.advisories {
            if !self.advisories.contains(&course) {
                self.advisories.push(course);
            }
        }
        self.eligible = self.missing.is_empty();
    }

    /// Distinct courses referenced by the missing requirements.
    pub fn missing_courses(&self) -> Vec<CourseId> {
        let mut out: Vec<CourseId> = Vec::new();
        for m in &self.missing {
            for c in m.courses() {
                if !out.contains(c) {
                    out.push(c.clone());
                }
            }
        }
        out
    }
}
