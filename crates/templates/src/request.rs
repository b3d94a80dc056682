//! Request payloads for the template store.
//!
//! Payloads mirror what callers send over the wire: enum fields are strings
//! and numbers are signed, so bad values are reported as validation errors
//! instead of failing to deserialize.

use serde::{Deserialize, Serialize};
use certrack_core::{
    AssessmentType, BreakType, ComponentId, ComponentType, CourseId, EngineError, Result,
    SessionTemplate, TemplateComponent, TemplateId, TemplateType, Time,
};

fn default_true() -> bool {
    true
}

/// Payload for creating a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub template_type: String,
    #[serde(default)]
    pub total_duration_minutes: i64,
    #[serde(default)]
    pub estimated_break_minutes: i64,
    #[serde(default)]
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub required_instructors: i64,
    #[serde(default)]
    pub required_rooms: i64,
    #[serde(default)]
    pub required_equipment: Vec<String>,
}

impl TemplateSpec {
    /// Minimal payload.
    pub fn new(name: impl Into<String>, code: impl Into<String>, template_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            template_type: template_type.into(),
            ..Default::default()
        }
    }

    /// Validate and turn into a new active template with version 0.
    pub fn build(self, now: Time) -> Result<SessionTemplate> {
        let name = required_text("name", &self.name)?;
        let code = required_text("code", &self.code)?;
        let template_type: TemplateType = self.template_type.parse()?;

        Ok(SessionTemplate {
            id: TemplateId::new(),
            name,
            code,
            description: self.description.unwrap_or_default(),
            template_type,
            total_duration_minutes: non_negative("total_duration_minutes", self.total_duration_minutes)?,
            estimated_break_minutes: non_negative("estimated_break_minutes", self.estimated_break_minutes)?,
            max_participants: optional_positive("max_participants", self.max_participants)?,
            is_active: true,
            is_public: self.is_public,
            requires_approval: self.requires_approval,
            required_instructors: non_negative("required_instructors", self.required_instructors)?,
            required_rooms: non_negative("required_rooms", self.required_rooms)?,
            required_equipment: normalize_equipment(self.required_equipment),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a template's descriptive and resource fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub total_duration_minutes: Option<i64>,
    pub estimated_break_minutes: Option<i64>,
    /// `Some(None)` clears the cap
    pub max_participants: Option<Option<i64>>,
    pub is_public: Option<bool>,
    pub requires_approval: Option<bool>,
    pub required_instructors: Option<i64>,
    pub required_rooms: Option<i64>,
    pub required_equipment: Option<Vec<String>>,
}

impl TemplatePatch {
    /// Validate the whole patch, then apply it.
    pub fn apply(self, template: &mut SessionTemplate) -> Result<()> {
        let mut next = template.clone();
        if let Some(name) = self.name {
            next.name = required_text("name", &name)?;
        }
        if let Some(description) = self.description {
            next.description = description;
        }
        if let Some(v) = self.total_duration_minutes {
            next.total_duration_minutes = non_negative("total_duration_minutes", v)?;
        }
        if let Some(v) = self.estimated_break_minutes {
            next.estimated_break_minutes = non_negative("estimated_break_minutes", v)?;
        }
        if let Some(v) = self.max_participants {
            next.max_participants = optional_positive("max_participants", v)?;
        }
        if let Some(v) = self.is_public {
            next.is_public = v;
        }
        if let Some(v) = self.requires_approval {
            next.requires_approval = v;
        }
        if let Some(v) = self.required_instructors {
            next.required_instructors = non_negative("required_instructors", v)?;
        }
        if let Some(v) = self.required_rooms {
            next.required_rooms = non_negative("required_rooms", v)?;
        }
        if let Some(v) = self.required_equipment {
            next.required_equipment = normalize_equipment(v);
        }
        *template = next;
        Ok(())
    }
}

/// Payload for adding a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub course_id: Option<String>,
    pub component_type: String,
    /// Explicit position; colliding siblings are shifted down
    #[serde(default)]
    pub sequence_order: Option<i64>,
    #[serde(default)]
    pub duration_minutes: i64,
    /// Defaults to true for BREAK and LUNCH components
    #[serde(default)]
    pub is_break: Option<bool>,
    #[serde(default)]
    pub break_type: Option<String>,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default)]
    pub allows_parallel: bool,
    #[serde(default)]
    pub instructor_required: bool,
    #[serde(default)]
    pub room_required: bool,
    #[serde(default)]
    pub equipment_required: bool,
    #[serde(default)]
    pub max_participants: Option<i64>,
    /// Defaults to true for ASSESSMENT components
    #[serde(default)]
    pub has_assessment: Option<bool>,
    #[serde(default)]
    pub assessment_type: Option<String>,
    #[serde(default)]
    pub min_score_required: Option<f64>,
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub special_requirements: Option<String>,
}

impl ComponentSpec {
    /// Mandatory component of the given type.
    pub fn new(name: impl Into<String>, component_type: impl Into<String>, duration_minutes: i64) -> Self {
        Self {
            name: name.into(),
            course_id: None,
            component_type: component_type.into(),
            sequence_order: None,
            duration_minutes,
            is_break: None,
            break_type: None,
            is_mandatory: true,
            allows_parallel: false,
            instructor_required: false,
            room_required: false,
            equipment_required: false,
            max_participants: None,
            has_assessment: None,
            assessment_type: None,
            min_score_required: None,
            max_attempts: None,
            special_requirements: None,
        }
    }

    /// Mandatory COURSE component.
    pub fn course(name: impl Into<String>, course_id: impl Into<String>, duration_minutes: i64) -> Self {
        let mut spec = Self::new(name, "COURSE", duration_minutes);
        spec.course_id = Some(course_id.into());
        spec.instructor_required = true;
        spec.room_required = true;
        spec
    }

    /// Short break.
    pub fn short_break(duration_minutes: i64) -> Self {
        let mut spec = Self::new("Break", "BREAK", duration_minutes);
        spec.is_mandatory = false;
        spec.break_type = Some("SHORT".to_string());
        spec
    }

    /// Attach an assessment with a pass mark and attempt budget.
    pub fn with_assessment(mut self, assessment_type: &str, min_score: f64, max_attempts: Option<i64>) -> Self {
        self.has_assessment = Some(true);
        self.assessment_type = Some(assessment_type.to_string());
        self.min_score_required = Some(min_score);
        self.max_attempts = max_attempts;
        self
    }

    /// Mark as optional.
    pub fn optional(mut self) -> Self {
        self.is_mandatory = false;
        self
    }

    /// Request an explicit position.
    pub fn at(mut self, order: i64) -> Self {
        self.sequence_order = Some(order);
        self
    }

    /// Requested position, validated.
    pub fn requested_order(&self) -> Result<Option<u32>> {
        self.sequence_order
            .map(|o| non_negative("sequence_order", o))
            .transpose()
    }

    /// Validate and build a component for `template_id`; the caller assigns
    /// `sequence_order`.
    pub fn build(self, template_id: TemplateId) -> Result<TemplateComponent> {
        let name = required_text("name", &self.name)?;
        let component_type: ComponentType = self.component_type.parse()?;

        let is_break = self
            .is_break
            .unwrap_or(matches!(component_type, ComponentType::Break | ComponentType::Lunch));
        let break_type = match self.break_type {
            Some(raw) => Some(raw.parse::<BreakType>()?),
            None if is_break && component_type == ComponentType::Lunch => Some(BreakType::Lunch),
            None => None,
        };
        if break_type.is_some() && !is_break {
            return Err(EngineError::validation("break_type is only allowed on breaks"));
        }

        let has_assessment = self
            .has_assessment
            .unwrap_or(component_type == ComponentType::Assessment);
        if !has_assessment
            && (self.assessment_type.is_some() || self.min_score_required.is_some() || self.max_attempts.is_some())
        {
            return Err(EngineError::validation(
                "assessment_type, min_score_required and max_attempts need has_assessment",
            ));
        }
        let assessment_type = self
            .assessment_type
            .map(|raw| raw.parse::<AssessmentType>())
            .transpose()?;
        let min_score_required = match self.min_score_required {
            Some(v) if !v.is_finite() || v < 0.0 => {
                return Err(EngineError::validation(format!(
                    "min_score_required must be non-negative, got {}",
                    v
                )))
            }
            Some(v) => Some(v as f32),
            None if has_assessment => Some(0.0),
            None => None,
        };
        let max_attempts = match self.max_attempts {
            Some(v) if v < 1 => {
                return Err(EngineError::validation(format!("max_attempts must be at least 1, got {}", v)))
            }
            Some(v) => Some(non_negative("max_attempts", v)?),
            None => None,
        };

        let component = TemplateComponent {
            id: ComponentId::new(),
            session_template_id: template_id,
            name,
            course_id: self
                .course_id
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .map(CourseId::from),
            component_type,
            sequence_order: 0,
            duration_minutes: non_negative("duration_minutes", self.duration_minutes)?,
            is_break,
            break_type,
            is_mandatory: self.is_mandatory,
            allows_parallel: self.allows_parallel,
            instructor_required: self.instructor_required,
            room_required: self.room_required,
            equipment_required: self.equipment_required,
            max_participants: optional_positive("max_participants", self.max_participants)?,
            has_assessment,
            assessment_type,
            min_score_required,
            max_attempts,
            special_requirements: self.special_requirements.filter(|s| !s.trim().is_empty()),
        };
        component.check_invariants().map_err(EngineError::Validation)?;
        Ok(component)
    }
}

/// Partial update of a component's non-order fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentPatch {
    pub name: Option<String>,
    pub duration_minutes: Option<i64>,
    pub is_mandatory: Option<bool>,
    pub allows_parallel: Option<bool>,
    pub instructor_required: Option<bool>,
    pub room_required: Option<bool>,
    pub equipment_required: Option<bool>,
    /// `Some(None)` clears the override
    pub max_participants: Option<Option<i64>>,
    pub min_score_required: Option<f64>,
    pub max_attempts: Option<i64>,
    pub special_requirements: Option<String>,
}

impl ComponentPatch {
    /// Validate the whole patch, then apply it.
    pub fn apply(self, component: &mut TemplateComponent) -> Result<()> {
        let mut next = component.clone();
        if let Some(name) = self.name {
            next.name = required_text("name", &name)?;
        }
        if let Some(v) = self.duration_minutes {
            next.duration_minutes = non_negative("duration_minutes", v)?;
        }
        if let Some(v) = self.is_mandatory {
            next.is_mandatory = v;
        }
        if let Some(v) = self.allows_parallel {
            next.allows_parallel = v;
        }
        if let Some(v) = self.instructor_required {
            next.instructor_required = v;
        }
        if let Some(v) = self.room_required {
            next.room_required = v;
        }
        if let Some(v) = self.equipment_required {
            next.equipment_required = v;
        }
        if let Some(v) = self.max_participants {
            next.max_participants = optional_positive("max_participants", v)?;
        }
        if let Some(v) = self.min_score_required {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::validation(format!(
                    "min_score_required must be non-negative, got {}",
                    v
                )));
            }
            next.min_score_required = Some(v as f32);
        }
        if let Some(v) = self.max_attempts {
            if v < 1 {
                return Err(EngineError::validation(format!("max_attempts must be at least 1, got {}", v)));
            }
            next.max_attempts = Some(non_negative("max_attempts", v)?);
        }
        if let Some(v) = self.special_requirements {
            next.special_requirements = Some(v).filter(|s| !s.trim().is_empty());
        }
        next.check_invariants().map_err(EngineError::Validation)?;
        *component = next;
        Ok(())
    }
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn non_negative(field: &str, value: i64) -> Result<u32> {
    if value < 0 {
        return Err(EngineError::validation(format!("{} must be non-negative, got {}", field, value)));
    }
    u32::try_from(value)
        .map_err(|_| EngineError::validation(format!("{} is too large: {}", field, value)))
}

fn optional_positive(field: &str, value: Option<i64>) -> Result<Option<u32>> {
    match value {
        Some(v) if v < 1 => Err(EngineError::validation(format!("{} must be at least 1, got {}", field, v))),
        Some(v) => Ok(Some(non_negative(field, v)?)),
        None => Ok(None),
    }
}

fn normalize_equipment(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_negative_duration_rejected() {
        let mut spec = TemplateSpec::new("First Aid", "FA", "SINGLE_COURSE");
        spec.total_duration_minutes = -30;
        let err = spec.build(Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("total_duration_minutes")));
    }

    #[test]
    fn test_bad_template_type_rejected() {
        let spec = TemplateSpec::new("First Aid", "FA", "BOOTCAMP");
        assert!(matches!(spec.build(Utc::now()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_equipment_deduplicated() {
        let mut spec = TemplateSpec::new("First Aid", "FA", "single_course");
        spec.required_equipment = vec!["manikin".into(), " AED ".into(), "manikin".into()];
        let t = spec.build(Utc::now()).unwrap();
        assert_eq!(t.required_equipment, vec!["AED".to_string(), "manikin".to_string()]);
        assert!(t.is_active);
    }

    #[test]
    fn test_lunch_defaults() {
        let c = ComponentSpec::new("Lunch", "LUNCH", 45).build(TemplateId::new()).unwrap();
        assert!(c.is_break);
        assert_eq!(c.break_type, Some(BreakType::Lunch));
        assert!(!c.has_assessment);
    }

    #[test]
    fn test_assessment_defaults() {
        let c = ComponentSpec::new("Exam", "ASSESSMENT", 30).build(TemplateId::new()).unwrap();
        assert!(c.has_assessment);
        assert_eq!(c.min_score_required, Some(0.0));
    }

    #[test]
    fn test_break_type_on_course_rejected() {
        let mut spec = ComponentSpec::course("Intro", "FA-101", 60);
        spec.break_type = Some("SHORT".into());
        assert!(matches!(spec.build(TemplateId::new()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_course_without_course_id_rejected() {
        let spec = ComponentSpec::new("Intro", "COURSE", 60);
        assert!(matches!(spec.build(TemplateId::new()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_pass_mark_without_assessment_rejected() {
        let mut spec = ComponentSpec::course("Intro", "FA-101", 60);
        spec.min_score_required = Some(50.0);
        assert!(matches!(spec.build(TemplateId::new()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_patch_is_all_or_nothing() {
        let mut c = ComponentSpec::course("Intro", "FA-101", 60)
            .build(TemplateId::new())
            .unwrap();
        let before = c.clone();

        let patch = ComponentPatch {
            name: Some("Renamed".into()),
            duration_minutes: Some(-5),
            ..Default::default()
        };
        assert!(patch.apply(&mut c).is_err());
        assert_eq!(c, before);
    }
}
