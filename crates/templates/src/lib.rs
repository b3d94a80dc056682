//! Template Store
//!
//! Reusable session blueprints made of ordered components.

pub mod catalog;
pub mod request;
pub mod store;
pub mod structure;

pub use catalog::{CourseCatalog, CourseInfo, StaticCatalog};
pub use request::{ComponentPatch, ComponentSpec, TemplatePatch, TemplateSpec};
pub use store::TemplateStore;
pub use structure::{check_structure, StructureWarning};
