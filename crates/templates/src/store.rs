//! Template store service.

use std::collections::HashSet;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use certrack_core::{
    is_strictly_ordered, ComponentId, EngineConfig, EngineError, Result, SessionTemplate,
    TemplateComponent, TemplateFilter, TemplateId, TemplateWithComponents,
};
use certrack_storage::{ComponentChanges, KeyedLocks, Storage};

use crate::catalog::CourseCatalog;
use crate::request::{ComponentPatch, ComponentSpec, TemplatePatch, TemplateSpec};
use crate::structure::{check_structure, StructureWarning};

/// Owns templates and their ordered components.
///
/// Structural edits to one template are serialized; edits to different
/// templates run in parallel.
pub struct TemplateStore {
    storage: Arc<dyn Storage>,
    catalog: Option<Arc<dyn CourseCatalog>>,
    config: EngineConfig,
    locks: KeyedLocks<TemplateId>,
    create_gate: Mutex<()>,
}

impl TemplateStore {
    /// Create a store with the default configuration and no catalog.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            catalog: None,
            config: EngineConfig::default(),
            locks: KeyedLocks::new(),
            create_gate: Mutex::new(()),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Check course references against a catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn CourseCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create a template with no components.
    pub async fn create_template(&self, spec: TemplateSpec) -> Result<TemplateWithComponents> {
        let template = spec.build(Utc::now())?;

        // Code uniqueness needs the check and the write in one section.
        let _gate = self.create_gate.lock().await;
        if self.lookup_code(&template.code).await?.is_some() {
            warn!(code = %template.code, "rejected duplicate template code");
            return Err(EngineError::conflict(format!(
                "template code '{}' already exists",
                template.code
            )));
        }
        self.storage.save_template(&template).await?;

        info!(id = %template.id, code = %template.code, "created template");
        Ok(TemplateWithComponents {
            template,
            components: Vec::new(),
        })
    }

    /// Template with its components in sequence order.
    pub async fn get_template(&self, id: TemplateId) -> Result<TemplateWithComponents> {
        let template = self.load(id).await?;
        let components = self.storage.list_components(id).await?;
        Ok(TemplateWithComponents { template, components })
    }

    /// Template by its code (case-insensitive).
    pub async fn find_by_code(&self, code: &str) -> Result<TemplateWithComponents> {
        let template = self
            .lookup_code(code.trim())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("template code '{}'", code)))?;
        let components = self.storage.list_components(template.id).await?;
        Ok(TemplateWithComponents { template, components })
    }

    /// Templates matching a filter.
    pub async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<SessionTemplate>> {
        let mut templates = self.storage.list_templates(filter).await?;
        templates.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(templates)
    }

    /// Apply a partial update to a template's own fields.
    pub async fn update_template(&self, id: TemplateId, patch: TemplatePatch) -> Result<SessionTemplate> {
        let _guard = self.locks.lock(&id).await;
        let mut template = self.load(id).await?;
        patch.apply(&mut template)?;
        template.updated_at = Utc::now();
        self.storage.save_template(&template).await?;
        info!(id = %id, "updated template");
        Ok(template)
    }

    /// Re-enable a deactivated template.
    pub async fn activate_template(&self, id: TemplateId) -> Result<SessionTemplate> {
        self.set_active(id, true).await
    }

    /// Soft-delete: existing sessions keep working, new ones are refused.
    pub async fn deactivate_template(&self, id: TemplateId) -> Result<SessionTemplate> {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: TemplateId, active: bool) -> Result<SessionTemplate> {
        let _guard = self.locks.lock(&id).await;
        let mut template = self.load(id).await?;
        if template.is_active != active {
            template.is_active = active;
            template.updated_at = Utc::now();
            self.storage.save_template(&template).await?;
            info!(id = %id, active, "changed template activation");
        }
        Ok(template)
    }

    /// Hard delete. Refused once any session was built from the template.
    pub async fn delete_template(&self, id: TemplateId) -> Result<()> {
        let _guard = self.locks.lock(&id).await;
        self.load(id).await?;
        let sessions = self.storage.list_sessions(Some(id)).await?;
        if !sessions.is_empty() {
            warn!(id = %id, sessions = sessions.len(), "refused to delete template in use");
            return Err(EngineError::conflict(format!(
                "template {} has {} session(s); deactivate it instead",
                id,
                sessions.len()
            )));
        }
        self.storage.delete_template(id).await?;
        info!(id = %id, "deleted template");
        Ok(())
    }

    /// Add a component.
    ///
    /// Without an explicit order the component goes last. An explicit order
    /// that is already taken pushes that sibling and every later one down by
    /// one; the shift and the insert are written together.
    pub async fn add_component(&self, template_id: TemplateId, spec: ComponentSpec) -> Result<TemplateComponent> {
        let requested = spec.requested_order()?;
        if requested == Some(0) {
            return Err(EngineError::validation("sequence_order starts at 1"));
        }
        let mut component = spec.build(template_id)?;

        let _guard = self.locks.lock(&template_id).await;
        let mut template = self.load(template_id).await?;
        self.check_course(&component).await?;

        let existing = self.storage.list_components(template_id).await?;
        let mut upserts = Vec::new();
        match requested {
            None => {
                component.sequence_order = match existing.last() {
                    Some(c) => next_order(c.sequence_order)?,
                    None => 1,
                };
            }
            Some(order) => {
                component.sequence_order = order;
                if existing.iter().any(|c| c.sequence_order == order) {
                    for c in existing.iter().filter(|c| c.sequence_order >= order) {
                        let mut shifted = c.clone();
                        shifted.sequence_order = next_order(c.sequence_order)?;
                        upserts.push(shifted);
                    }
                    debug!(template = %template_id, order, shifted = upserts.len(), "shifting components");
                }
            }
        }
        upserts.push(component.clone());

        bump(&mut template);
        self.storage
            .write_components(&ComponentChanges {
                template,
                upserts,
                removals: Vec::new(),
            })
            .await?;

        info!(
            template = %template_id,
            component = %component.id,
            order = component.sequence_order,
            "added component"
        );
        Ok(component)
    }

    /// Apply a partial update to a component's non-order fields.
    pub async fn update_component(&self, component_id: ComponentId, patch: ComponentPatch) -> Result<TemplateComponent> {
        let template_id = self.load_component(component_id).await?.session_template_id;

        let _guard = self.locks.lock(&template_id).await;
        let mut component = self.load_component(component_id).await?;
        let mut template = self.load(template_id).await?;
        patch.apply(&mut component)?;

        bump(&mut template);
        self.storage
            .write_components(&ComponentChanges {
                template,
                upserts: vec![component.clone()],
                removals: Vec::new(),
            })
            .await?;
        info!(component = %component_id, "updated component");
        Ok(component)
    }

    /// Replace the component order with `ordered_ids`, numbered 1..=n.
    ///
    /// `ordered_ids` must be a permutation of the template's components.
    /// On rejection nothing changes.
    pub async fn reorder_components(
        &self,
        template_id: TemplateId,
        ordered_ids: &[ComponentId],
    ) -> Result<Vec<TemplateComponent>> {
        let _guard = self.locks.lock(&template_id).await;
        let mut template = self.load(template_id).await?;
        let existing = self.storage.list_components(template_id).await?;

        let known: HashSet<ComponentId> = existing.iter().map(|c| c.id).collect();
        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !seen.insert(*id) {
                return Err(EngineError::validation(format!("component {} listed twice", id)));
            }
            if !known.contains(id) {
                return Err(EngineError::validation(format!(
                    "component {} does not belong to template {}",
                    id, template_id
                )));
            }
        }
        if seen.len() != known.len() {
            return Err(EngineError::validation(format!(
                "expected all {} components, got {}",
                known.len(),
                seen.len()
            )));
        }

        let mut reordered = Vec::with_capacity(ordered_ids.len());
        for (position, id) in ordered_ids.iter().enumerate() {
            if let Some(c) = existing.iter().find(|c| c.id == *id) {
                let mut c = c.clone();
                c.sequence_order = position as u32 + 1;
                reordered.push(c);
            }
        }
        debug_assert!(is_strictly_ordered(&reordered));

        bump(&mut template);
        self.storage
            .write_components(&ComponentChanges {
                template,
                upserts: reordered.clone(),
                removals: Vec::new(),
            })
            .await?;
        info!(template = %template_id, count = reordered.len(), "reordered components");
        Ok(reordered)
    }

    /// Remove a component that no progress record refers to. Leaves a gap
    /// in the order.
    pub async fn delete_component(&self, component_id: ComponentId) -> Result<()> {
        let template_id = self.load_component(component_id).await?.session_template_id;

        let _guard = self.locks.lock(&template_id).await;
        let mut template = self.load(template_id).await?;
        let references = self.storage.count_progress_for_component(component_id).await?;
        if references > 0 {
            warn!(component = %component_id, references, "refused to delete referenced component");
            return Err(EngineError::conflict(format!(
                "component {} is referenced by {} progress record(s)",
                component_id, references
            )));
        }

        bump(&mut template);
        self.storage
            .write_components(&ComponentChanges {
                template,
                upserts: Vec::new(),
                removals: vec![component_id],
            })
            .await?;
        info!(template = %template_id, component = %component_id, "deleted component");
        Ok(())
    }

    /// Lint a template. Warnings never block anything.
    pub async fn validate_structure(&self, template_id: TemplateId) -> Result<Vec<StructureWarning>> {
        let TemplateWithComponents { template, components } = self.get_template(template_id).await?;
        let mut warnings = check_structure(&template, &components, self.config.duration_tolerance_minutes);

        if let Some(catalog) = &self.catalog {
            for c in &components {
                let Some(course_id) = &c.course_id else { continue };
                if let Some(info) = catalog.course(course_id).await? {
                    let catalog_minutes = (info.duration_hours * 60.0).round().max(0.0) as u32;
                    if catalog_minutes != c.duration_minutes {
                        warnings.push(StructureWarning::CatalogDurationMismatch {
                            component_id: c.id,
                            planned_minutes: c.duration_minutes,
                            catalog_minutes,
                        });
                    }
                }
            }
        }

        for w in &warnings {
            warn!(template = %template_id, "{}", w);
        }
        Ok(warnings)
    }

    async fn load(&self, id: TemplateId) -> Result<SessionTemplate> {
        self.storage
            .load_template(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("template {}", id)))
    }

    async fn load_component(&self, id: ComponentId) -> Result<TemplateComponent> {
        self.storage
            .load_component(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("component {}", id)))
    }

    async fn lookup_code(&self, code: &str) -> Result<Option<SessionTemplate>> {
        let all = self.storage.list_templates(&TemplateFilter::default()).await?;
        Ok(all.into_iter().find(|t| t.code.eq_ignore_ascii_case(code)))
    }

    async fn check_course(&self, component: &TemplateComponent) -> Result<()> {
        let (Some(catalog), Some(course_id)) = (&self.catalog, &component.course_id) else {
            return Ok(());
        };
        if catalog.course(course_id).await?.is_none() {
            return Err(EngineError::validation(format!("unknown course {}", course_id)));
        }
        Ok(())
    }
}

fn next_order(order: u32) -> Result<u32> {
    order
        .checked_add(1)
        .ok_or_else(|| EngineError::validation("sequence_order is at its maximum; reorder the components first"))
}

fn bump(template: &mut SessionTemplate) {
    template.version += 1;
    template.updated_at = Utc::now();
}
