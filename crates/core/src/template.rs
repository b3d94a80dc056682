//! Session templates and their ordered components.

use serde::{Deserialize, Serialize};
use crate::id::{ComponentId, CourseId, TemplateId};
use crate::wire::wire_enum;
use crate::Time;

wire_enum! {
    /// Kind of session a template describes.
    pub enum TemplateType {
        /// One course, possibly with breaks
        SingleCourse => "SINGLE_COURSE",
        /// Several courses delivered back to back
        MultiCourse => "MULTI_COURSE",
        /// Workshop series
        WorkshopSeries => "WORKSHOP_SERIES",
        /// Track leading to a certification
        CertificationTrack => "CERTIFICATION_TRACK",
    }
}

wire_enum! {
    /// Kind of step within a template.
    pub enum ComponentType {
        /// Catalog course
        Course => "COURSE",
        /// Break
        Break => "BREAK",
        /// Stand-alone assessment
        Assessment => "ASSESSMENT",
        /// Activity
        Activity => "ACTIVITY",
        /// Discussion
        Discussion => "DISCUSSION",
        /// Hands-on practical
        Practical => "PRACTICAL",
        /// Lunch
        Lunch => "LUNCH",
    }
}

wire_enum! {
    /// Kind of break.
    pub enum BreakType {
        /// Short break
        Short => "SHORT",
        /// Lunch break
        Lunch => "LUNCH",
        /// Extended break
        Extended => "EXTENDED",
    }
}

wire_enum! {
    /// How an assessment is performed.
    pub enum AssessmentType {
        /// Written test
        Written => "WRITTEN",
        /// Practical test
        Practical => "PRACTICAL",
        /// Written and practical
        Both => "BOTH",
        /// Instructor observation
        Observation => "OBSERVATION",
    }
}

/// A reusable blueprint for a training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTemplate {
    /// Unique identifier
    pub id: TemplateId,

    /// Display name
    pub name: String,

    /// Unique human-referenceable code
    pub code: String,

    /// Free-form description
    pub description: String,

    /// Template kind
    pub template_type: TemplateType,

    /// Planned total duration
    pub total_duration_minutes: u32,

    /// Planned break time not modelled as components
    pub estimated_break_minutes: u32,

    /// Participant cap
    pub max_participants: Option<u32>,

    /// Soft-deactivation flag
    pub is_active: bool,

    /// Visible in the public catalog
    pub is_public: bool,

    /// Enrollments need approval
    pub requires_approval: bool,

    /// Instructors needed
    pub required_instructors: u32,

    /// Rooms needed
    pub required_rooms: u32,

    /// Equipment needed
    pub required_equipment: Vec<String>,

    /// Bumped on every structural component edit
    pub version: u32,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

/// One ordered step owned by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateComponent {
    /// Unique identifier
    pub id: ComponentId,

    /// Owning template
    pub session_template_id: TemplateId,

    /// Display name
    pub name: String,

    /// Course reference (COURSE components only)
    pub course_id: Option<CourseId>,

    /// Step kind
    pub component_type: ComponentType,

    /// Position within the template; strictly increasing, gaps allowed
    pub sequence_order: u32,

    /// Planned duration
    pub duration_minutes: u32,

    /// Whether this step is a break
    pub is_break: bool,

    /// Break kind, only for breaks
    pub break_type: Option<BreakType>,

    /// Counts towards completion
    pub is_mandatory: bool,

    /// May run alongside other components
    pub allows_parallel: bool,

    /// Needs an instructor present
    pub instructor_required: bool,
    /// Needs a room booked
    pub room_required: bool,
    /// Needs equipment set up
    pub equipment_required: bool,

    /// Participant cap override
    pub max_participants: Option<u32>,

    /// Whether a score is recorded
    pub has_assessment: bool,

    /// Assessment kind, only with `has_assessment`
    pub assessment_type: Option<AssessmentType>,

    /// Pass mark, only with `has_assessment`
    pub min_score_required: Option<f32>,

    /// Attempt budget; falls back to the engine default when unset
    pub max_attempts: Option<u32>,

    /// Free-text requirements
    pub special_requirements: Option<String>,
}

impl TemplateComponent {
    /// Check the cross-field invariants of a single component.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.component_type == ComponentType::Course && self.course_id.is_none() {
            return Err(format!("COURSE component '{}' needs a course_id", self.name));
        }
        if self.break_type.is_some() && !self.is_break {
            return Err(format!("break_type set on non-break component '{}'", self.name));
        }
        if !self.has_assessment
            && (self.assessment_type.is_some() || self.min_score_required.is_some())
        {
            return Err(format!(
                "assessment fields set on component '{}' without has_assessment",
                self.name
            ));
        }
        if let Some(score) = self.min_score_required {
            if !score.is_finite() || score < 0.0 {
                return Err(format!("min_score_required must be non-negative, got {}", score));
            }
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Attempt budget after applying the configured default.
    pub fn effective_max_attempts(&self, default: u32) -> u32 {
        self.max_attempts.unwrap_or(default).max(1)
    }
}

/// A template together with its components in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateWithComponents {
    /// The template
    pub template: SessionTemplate,

    /// Components sorted by `sequence_order`
    pub components: Vec<TemplateComponent>,
}

/// Whether component orders are strictly increasing when sorted as given.
pub fn is_strictly_ordered(components: &[TemplateComponent]) -> bool {
    components
        .windows(2)
        .all(|w| w[0].sequence_order < w[1].sequence_order)
}

/// Filter for listing templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateFilter {
    /// Only active / inactive templates
    pub is_active: Option<bool>,

    /// Only public / private templates
    pub is_public: Option<bool>,

    /// Restrict to these kinds
    pub template_type: Option<Vec<TemplateType>>,
}

impl TemplateFilter {
    /// Whether a template passes this filter.
    pub fn matches(&self, template: &SessionTemplate) -> bool {
        if let Some(active) = self.is_active {
            if template.is_active != active {
                return false;
            }
        }
        if let Some(public) = self.is_public {
            if template.is_public != public {
                return false;
            }
        }
        if let Some(types) = &self.template_type {
            if !types.contains(&template.template_type) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(order: u32) -> TemplateComponent {
        TemplateComponent {
            id: ComponentId::new(),
            session_template_id: TemplateId::new(),
            name: format!("step {}", order),
            course_id: None,
            component_type: ComponentType::Activity,
            sequence_order: order,
            duration_minutes: 30,
            is_break: false,
            break_type: None,
            is_mandatory: true,
            allows_parallel: false,
            instructor_required: false,
            room_required: false,
            equipment_required: false,
            max_participants: None,
            has_assessment: false,
            assessment_type: None,
            min_score_required: None,
            max_attempts: None,
            special_requirements: None,
        }
    }

    #[test]
    fn test_template_type_parsing() {
        assert_eq!("multi_course".parse::<TemplateType>().unwrap(), TemplateType::MultiCourse);
        assert_eq!("CERTIFICATION-TRACK".parse::<TemplateType>().unwrap(), TemplateType::CertificationTrack);
        let err = "SEMINAR".parse::<TemplateType>().unwrap_err();
        assert!(matches!(err, crate::EngineError::Validation(_)));
    }

    #[test]
    fn test_wire_names_match_serde() {
        for ty in ComponentType::ALL {
            let json = serde_json::to_string(ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn test_strict_ordering() {
        let comps = vec![component(1), component(3), component(7)];
        assert!(is_strictly_ordered(&comps));

        let dup = vec![component(1), component(1)];
        assert!(!is_strictly_ordered(&dup));
    }

    #[test]
    fn test_course_component_requires_course() {
        let mut c = component(1);
        c.component_type = ComponentType::Course;
        assert!(c.check_invariants().is_err());

        c.course_id = Some(CourseId::new("FA-101"));
        assert!(c.check_invariants().is_ok());
    }

    #[test]
    fn test_assessment_fields_need_flag() {
        let mut c = component(1);
        c.min_score_required = Some(80.0);
        assert!(c.check_invariants().is_err());

        c.has_assessment = true;
        assert!(c.check_invariants().is_ok());
        assert_eq!(c.effective_max_attempts(3), 3);

        c.max_attempts = Some(2);
        assert_eq!(c.effective_max_attempts(3), 2);
    }
}
