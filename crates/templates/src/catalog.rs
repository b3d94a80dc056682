//! Course catalog contract.

use std::collections::HashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use certrack_core::{CourseId, Result};

/// What the catalog knows about a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub name: String,
    pub code: String,
    pub duration_hours: f32,
}

/// Read-only access to the course catalog.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Look up a course; `None` if the catalog does not know it.
    async fn course(&self, id: &CourseId) -> Result<Option<CourseInfo>>;
}

/// In-memory catalog, loaded once.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    courses: HashMap<CourseId, CourseInfo>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a course; its id doubles as its code.
    pub fn with_course(mut self, id: impl Into<CourseId>, name: &str, duration_hours: f32) -> Self {
        let id = id.into();
        let info = CourseInfo {
            name: name.to_string(),
            code: id.to_string(),
            duration_hours,
        };
        self.courses.insert(id, info);
        self
    }
}

#[async_trait]
impl CourseCatalog for StaticCatalog {
    async fn course(&self, id: &CourseId) -> Result<Option<CourseInfo>> {
        Ok(self.courses.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let catalog = StaticCatalog::new().with_course("FA-101", "First Aid Basics", 4.0);
        let info = catalog.course(&CourseId::new("FA-101")).await.unwrap().unwrap();
        assert_eq!(info.code, "FA-101");
        assert!(catalog.course(&CourseId::new("FA-999")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_course_replaces() {
        let catalog = StaticCatalog::new()
            .with_course("FA-101", "First Aid", 4.0)
            .with_course("FA-101", "First Aid Refresher", 2.0);
        let info = catalog.course(&CourseId::new("FA-101")).await.unwrap().unwrap();
        assert_eq!(info.name, "First Aid Refresher");
        assert_eq!(info.duration_hours, 2.0);
    }
}
