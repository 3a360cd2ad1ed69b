use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::compactor;
use crate::limits::*;
use crate::rack::Rack;

/// Per-property racks. Each property has its own rack, WAL and compactor.
/// The property is the database name of the pgwire connection.
pub struct PropertyManager {
    racks: DashMap<String, Arc<Rack>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep only characters that are safe in a file name.
fn file_stem(property: &str) -> String {
    property
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            racks: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get the rack for a property, opening (and replaying) it on first use.
    pub fn get_or_open(&self, property: &str) -> std::io::Result<Arc<Rack>> {
        if let Some(rack) = self.racks.get(property) {
            return Ok(rack.value().clone());
        }
        if property.len() > MAX_PROPERTY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }
        if self.racks.len() >= MAX_PROPERTIES {
            return Err(std::io::Error::other("too many properties"));
        }

        let stem = file_stem(property);
        if stem.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }

        // Two connections may race to open the same property; the entry lock
        // makes sure only one rack owns the WAL.
        let entry = self.racks.entry(property.to_string());
        let rack = match entry {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let rack = Arc::new(Rack::new(wal_path)?);
                e.insert(rack.clone());
                rack
            }
        };

        let compactor_rack = rack.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_rack, threshold).await;
        });

        tracing::info!("opened property {property} ({} rooms)", rack.room_count());
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.racks.len() as f64);
        Ok(rack)
    }

    pub fn property_count(&self) -> usize {
        self.racks.len()
    }
}
