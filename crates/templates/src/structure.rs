//! Structural lint for templates.
//!
//! Warnings are informational; nothing here blocks a write.

use std::fmt;
use serde::{Deserialize, Serialize};
use certrack_core::{ComponentId, ComponentType, SessionTemplate, TemplateComponent};

/// A structural problem worth surfacing to the template author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureWarning {
    /// Template has no components
    NoComponents,

    /// Component minutes plus estimated breaks differ from the planned total
    DurationMismatch {
        planned: u32,
        actual: u32,
    },

    /// COURSE component without a course reference
    CourseWithoutCourseId {
        component_id: ComponentId,
    },

    /// A break that students are required to attend
    MandatoryBreak {
        component_id: ComponentId,
    },

    /// Assessment component with no pass mark
    AssessmentWithoutPassMark {
        component_id: ComponentId,
    },

    /// Component cap larger than the template cap
    ComponentCapacityExceedsTemplate {
        component_id: ComponentId,
        component_max: u32,
        template_max: u32,
    },

    /// Catalog duration differs from the planned component duration
    CatalogDurationMismatch {
        component_id: ComponentId,
        planned_minutes: u32,
        catalog_minutes: u32,
    },
}

impl fmt::Display for StructureWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoComponents => write!(f, "template has no components"),
            Self::DurationMismatch { planned, actual } => write!(
                f,
                "planned {} minutes but components and breaks add up to {}",
                planned, actual
            ),
            Self::CourseWithoutCourseId { component_id } => {
                write!(f, "course component {} has no course", component_id)
            }
            Self::MandatoryBreak { component_id } => {
                write!(f, "break {} is marked mandatory", component_id)
            }
            Self::AssessmentWithoutPassMark { component_id } => {
                write!(f, "assessment {} has no pass mark", component_id)
            }
            Self::ComponentCapacityExceedsTemplate {
                component_id,
                component_max,
                template_max,
            } => write!(
                f,
                "component {} allows {} participants, template allows {}",
                component_id, component_max, template_max
            ),
            Self::CatalogDurationMismatch {
                component_id,
                planned_minutes,
                catalog_minutes,
            } => write!(
                f,
                "component {} planned for {} minutes, catalog says {}",
                component_id, planned_minutes, catalog_minutes
            ),
        }
    }
}

/// Lint a template against its components.
pub fn check_structure(
    template: &SessionTemplate,
    components: &[TemplateComponent],
    tolerance_minutes: u32,
) -> Vec<StructureWarning> {
    let mut warnings = Vec::new();

    if components.is_empty() {
        warnings.push(StructureWarning::NoComponents);
        return warnings;
    }

    let actual: u32 = components
        .iter()
        .map(|c| c.duration_minutes)
        .fold(template.estimated_break_minutes, u32::saturating_add);
    if actual.abs_diff(template.total_duration_minutes) > tolerance_minutes {
        warnings.push(StructureWarning::DurationMismatch {
            planned: template.total_duration_minutes,
            actual,
        });
    }

    for c in components {
        if c.component_type == ComponentType::Course && c.course_id.is_none() {
            warnings.push(StructureWarning::CourseWithoutCourseId { component_id: c.id });
        }
        if c.is_break && c.is_mandatory {
            warnings.push(StructureWarning::MandatoryBreak { component_id: c.id });
        }
        if c.has_assessment && c.min_score_required.map_or(true, |s| s <= 0.0) {
            warnings.push(StructureWarning::AssessmentWithoutPassMark { component_id: c.id });
        }
        if let (Some(component_max), Some(template_max)) = (c.max_participants, template.max_participants) {
            if component_max > template_max {
                warnings.push(StructureWarning::ComponentCapacityExceedsTemplate {
                    component_id: c.id,
                    component_max,
                    template_max,
                });
            }
        }
    }

    warnings
}
