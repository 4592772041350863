//! Catalog collaborator.
//!
//! Behavior policies pick records (pages, media, shop items) from the
//! catalog; the scheduler asks it to turn the records a log event references
//! into catalog events shipped in the same batch.

use crate::config::SimulationConfig;
use crate::models::event::{CatalogEvent, CatalogType};
use crate::models::log_event::{LogEvent, ShopItem};
use crate::rng::RngManager;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Catalog types generated up front. Users and orders come into existence
/// during the simulation.
pub const STATIC_CATALOG_TYPES: [CatalogType; 9] = [
    CatalogType::App,
    CatalogType::Page,
    CatalogType::MediaVideo,
    CatalogType::MediaAudio,
    CatalogType::MediaImage,
    CatalogType::Drug,
    CatalogType::Blood,
    CatalogType::Oxygen,
    CatalogType::MedicalEquipment,
];

pub trait CatalogProvider {
    /// Record content, if the record exists.
    fn lookup(&self, catalog_type: CatalogType, id: &str) -> Option<Value>;

    /// Uniformly chosen record id of a type.
    fn random_record_id(&self, catalog_type: CatalogType, rng: &mut RngManager) -> Option<String>;

    fn record_count(&self, catalog_type: CatalogType) -> usize;

    /// Catalog events for every record `event` references, stamped at the
    /// event's timestamp. Records the catalog does not hold are emitted with
    /// their id only.
    fn derive_associated_catalog_events(&self, event: &LogEvent) -> Vec<CatalogEvent> {
        event
            .catalog_refs()
            .into_iter()
            .map(|reference| {
                let data = self
                    .lookup(reference.catalog_type, &reference.id)
                    .unwrap_or_else(|| json!({ "id": reference.id }));
                CatalogEvent::new(event.ts, reference.catalog_type, reference.id, data)
            })
            .collect()
    }
}

/// Price of a shop record, 0.0 when it carries none.
pub fn shop_item_from_record(catalog_type: CatalogType, id: &str, record: &Value) -> ShopItem {
    ShopItem {
        id: id.to_string(),
        catalog_type,
        price: record.get("price").and_then(Value::as_f64).unwrap_or(0.0),
    }
}

#[derive(Debug, Clone, Default)]
struct CatalogTable {
    ids: Vec<String>,
    records: BTreeMap<String, Value>,
}

/// Deterministic in-memory catalog.
///
/// Record ids are `"{type}_{index:05}"`; content is derived from the index
/// so two catalogs built from the same configuration are identical.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    tables: BTreeMap<CatalogType, CatalogTable>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate every static catalog type to its configured target count.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut catalog = Self::new();
        for catalog_type in STATIC_CATALOG_TYPES {
            let count = if catalog_type == CatalogType::App {
                1
            } else {
                config.catalog_config(catalog_type).target_count
            };
            for index in 0..count {
                let id = if catalog_type == CatalogType::App {
                    config.global.app_id()
                } else {
                    format!("{}_{:05}", catalog_type, index)
                };
                let record = Self::generate_record(catalog_type, &id, index);
                catalog.insert(catalog_type, id, record);
            }
        }
        catalog
    }

    pub fn insert(&mut self, catalog_type: CatalogType, id: impl Into<String>, record: Value) {
        let id = id.into();
        let table = self.tables.entry(catalog_type).or_default();
        if table.records.insert(id.clone(), record).is_none() {
            table.ids.push(id);
        }
    }

    fn generate_record(catalog_type: CatalogType, id: &str, index: usize) -> Value {
        match catalog_type {
            CatalogType::Page => json!({
                "id": id,
                "path": format!("/pages/{}", index),
                "title": format!("Page {}", index),
            }),
            CatalogType::MediaVideo | CatalogType::MediaAudio => json!({
                "id": id,
                "title": format!("{} {}", catalog_type, index),
                "length": 30_000 + (index as i64 % 120) * 5_000,
            }),
            CatalogType::MediaImage => json!({
                "id": id,
                "title": format!("Image {}", index),
                "length": 0,
            }),
            t if t.is_shop_item() => json!({
                "id": id,
                "name": format!("{} {}", catalog_type, index),
                "price": 1.0 + ((index * 37) % 1000) as f64 / 10.0,
            }),
            _ => json!({ "id": id }),
        }
    }
}

impl CatalogProvider for ReferenceCatalog {
    fn lookup(&self, catalog_type: CatalogType, id: &str) -> Option<Value> {
        self.tables.get(&catalog_type)?.records.get(id).cloned()
    }

    fn random_record_id(&self, catalog_type: CatalogType, rng: &mut RngManager) -> Option<String> {
        let table = self.tables.get(&catalog_type)?;
        if table.ids.is_empty() {
            return None;
        }
        let index = rng.range(0, table.ids.len() as i64) as usize;
        table.ids.get(index).cloned()
    }

    fn record_count(&self, catalog_type: CatalogType) -> usize {
        self.tables.get(&catalog_type).map_or(0, |table| table.ids.len())
    }
}
