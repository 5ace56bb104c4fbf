//! # Zone & Template Catalog
//!
//! Static tables of the zones and entity templates a world knows about.
//! Populated before networking starts, read-only afterwards (the world
//! holds it behind an `Arc`).
//!
//! ## File Format
//!
//! ```toml
//! [[zones]]
//! id = 1
//! name = "harbor"
//! template = "res://zones/harbor.tscn"
//!
//! [[templates]]
//! id = 3
//! name = "crate"
//! template = "res://props/crate.tscn"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use zonesync_shared::{TemplateId, ZoneId};

use crate::error::{RegistryError, RegistryResult};

/// Opaque reference the scene host knows how to instantiate.
pub type TemplateRef = String;

/// Static description of one zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    /// Zone identity.
    pub id: ZoneId,
    /// Human name, unique by convention.
    pub name: String,
    /// Scene to instantiate as the zone root.
    pub template: TemplateRef,
}

impl ZoneDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(id: ZoneId, name: impl Into<String>, template: impl Into<TemplateRef>) -> Self {
        Self {
            id,
            name: name.into(),
            template: template.into(),
        }
    }
}

/// One spawnable entity kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTemplate {
    /// Template identity.
    pub id: TemplateId,
    /// Human name.
    pub name: String,
    /// Scene to instantiate for each entity.
    pub template: TemplateRef,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    zones: Vec<ZoneDescriptor>,
    #[serde(default)]
    templates: Vec<EntityTemplate>,
}

/// Zone and entity-template tables.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    zones: HashMap<ZoneId, ZoneDescriptor>,
    templates: HashMap<TemplateId, EntityTemplate>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from TOML text.
    pub fn from_toml_str(text: &str) -> RegistryResult<Self> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| RegistryError::Parse(e.to_string()))?;

        let mut catalog = Self::new();
        for zone in file.zones {
            catalog.register_zone(zone)?;
        }
        for template in file.templates {
            catalog.register_entity_template(template.id, template.name, template.template)?;
        }
        Ok(catalog)
    }

    /// Reads and parses a catalog file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Registers a zone.
    pub fn register_zone(&mut self, descriptor: ZoneDescriptor) -> RegistryResult<()> {
        if self.zones.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateZone(descriptor.id));
        }
        tracing::debug!(zone_id = descriptor.id, name = %descriptor.name, "zone registered");
        self.zones.insert(descriptor.id, descriptor);
        Ok(())
    }

    /// Removes a zone, returning its descriptor.
    pub fn unregister_zone(&mut self, zone_id: ZoneId) -> RegistryResult<ZoneDescriptor> {
        self.zones
            .remove(&zone_id)
            .ok_or(RegistryError::UnknownZone(zone_id))
    }

    /// Registers an entity template.
    pub fn register_entity_template(
        &mut self,
        id: TemplateId,
        name: impl Into<String>,
        template: impl Into<TemplateRef>,
    ) -> RegistryResult<()> {
        if self.templates.contains_key(&id) {
            return Err(RegistryError::DuplicateTemplate(id));
        }
        let entry = EntityTemplate {
            id,
            name: name.into(),
            template: template.into(),
        };
        tracing::debug!(template_id = id, name = %entry.name, "entity template registered");
        self.templates.insert(id, entry);
        Ok(())
    }

    /// Looks up a zone by id.
    #[must_use]
    pub fn zone(&self, zone_id: ZoneId) -> Option<&ZoneDescriptor> {
        self.zones.get(&zone_id)
    }

    /// Looks up a zone by name.
    #[must_use]
    pub fn zone_by_name(&self, name: &str) -> Option<&ZoneDescriptor> {
        self.zones.values().find(|zone| zone.name == name)
    }

    /// Returns true if the zone id is registered.
    #[inline]
    #[must_use]
    pub fn zone_exists(&self, zone_id: ZoneId) -> bool {
        self.zones.contains_key(&zone_id)
    }

    /// Looks up an entity template by id.
    #[must_use]
    pub fn template(&self, template_id: TemplateId) -> Option<&EntityTemplate> {
        self.templates.get(&template_id)
    }

    /// Returns true if the template id is registered.
    #[inline]
    #[must_use]
    pub fn template_exists(&self, template_id: TemplateId) -> bool {
        self.templates.contains_key(&template_id)
    }

    /// Resolves a template name to its id.
    #[must_use]
    pub fn template_id_by_name(&self, name: &str) -> Option<TemplateId> {
        self.templates
            .values()
            .find(|template| template.name == name)
            .map(|template| template.id)
    }

    /// Number of registered zones.
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Number of registered templates.
    #[must_use]
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[zones]]
        id = 5
        name = "harbor"
        template = "zones/harbor"

        [[zones]]
        id = 6
        name = "market"
        template = "zones/market"

        [[templates]]
        id = 1
        name = "crate"
        template = "props/crate"
    "#;

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = Catalog::new();
        catalog
            .register_zone(ZoneDescriptor::new(5, "harbor", "zones/harbor"))
            .unwrap();
        catalog
            .register_entity_template(1, "crate", "props/crate")
            .unwrap();

        assert!(catalog.zone_exists(5));
        assert!(!catalog.zone_exists(6));
        assert_eq!(catalog.zone_by_name("harbor").map(|z| z.id), Some(5));
        assert!(catalog.template_exists(1));
        assert_eq!(catalog.template_id_by_name("crate"), Some(1));
        assert_eq!(catalog.template_id_by_name("barrel"), None);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut catalog = Catalog::new();
        catalog
            .register_zone(ZoneDescriptor::new(5, "harbor", "a"))
            .unwrap();
        assert_eq!(
            catalog.register_zone(ZoneDescriptor::new(5, "other", "b")),
            Err(RegistryError::DuplicateZone(5))
        );

        catalog.register_entity_template(1, "crate", "c").unwrap();
        assert_eq!(
            catalog.register_entity_template(1, "crate", "c"),
            Err(RegistryError::DuplicateTemplate(1))
        );
    }

    #[test]
    fn test_unregister_zone() {
        let mut catalog = Catalog::new();
        catalog
            .register_zone(ZoneDescriptor::new(5, "harbor", "a"))
            .unwrap();
        assert_eq!(catalog.unregister_zone(5).unwrap().name, "harbor");
        assert_eq!(
            catalog.unregister_zone(5),
            Err(RegistryError::UnknownZone(5))
        );
    }

    #[test]
    fn test_from_toml() {
        let catalog = Catalog::from_toml_str(SAMPLE).unwrap();
        assert_eq!(catalog.zone_count(), 2);
        assert_eq!(catalog.template_count(), 1);
        assert_eq!(catalog.zone(6).map(|z| z.template.as_str()), Some("zones/market"));
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(matches!(
            Catalog::from_toml_str("zones = 5"),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_from_toml_rejects_duplicate_ids() {
        let text = r#"
            [[zones]]
            id = 1
            name = "a"
            template = "a"

            [[zones]]
            id = 1
            name = "b"
            template = "b"
        "#;
        assert_eq!(
            Catalog::from_toml_str(text).unwrap_err(),
            RegistryError::DuplicateZone(1)
        );
    }
}
