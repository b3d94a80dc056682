//! Live sessions instantiated from templates.

use serde::{Deserialize, Serialize};
use crate::id::{ComponentId, CourseId, SessionId, TemplateId};
use crate::template::{ComponentType, TemplateComponent};
use crate::Time;

/// A session instantiated from a template.
///
/// The component list is pinned at instantiation time, so later template
/// edits never change what an enrolled student has to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    /// Unique identifier
    pub id: SessionId,

    /// Template this session was built from
    pub template_id: TemplateId,

    /// Template version at instantiation
    pub template_version: u32,

    /// Display name
    pub name: String,

    /// Scheduled start
    pub starts_at: Option<Time>,

    /// Participant cap
    pub max_participants: Option<u32>,

    /// Pinned components, in sequence order
    pub components: Vec<TemplateComponent>,

    /// Creation timestamp
    pub created_at: Time,
}

impl TrainingSession {
    /// Look up a pinned component.
    pub fn component(&self, id: ComponentId) -> Option<&TemplateComponent> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Courses delivered by this session, in order, without duplicates.
    pub fn course_ids(&self) -> Vec<CourseId> {
        let mut out: Vec<CourseId> = Vec::new();
        for c in &self.components {
            if c.component_type != ComponentType::Course {
                continue;
            }
            if let Some(course) = &c.course_id {
                if !out.contains(course) {
                    out.push(course.clone());
                }
            }
        }
        out
    }

    /// Number of mandatory components.
    pub fn mandatory_count(&self) -> usize {
        self.components.iter().filter(|c| c.is_mandatory).count()
    }
}
