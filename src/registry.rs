// 🗂️ Datastore Registry - the fleet of stores, keyed by name
//
// Built once at startup and passed by reference. Nothing registers itself:
// a store only appears here through `register`, `discover` or
// `create_from_config`.

use crate::config::SchemaConfig;
use crate::db::{Datastore, STORE_EXTENSION};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct DatastoreRegistry {
    stores: IndexMap<String, Datastore>,
}

impl DatastoreRegistry {
    pub fn new() -> Self {
        DatastoreRegistry {
            stores: IndexMap::new(),
        }
    }

    /// Add a handle. An existing entry with the same name is kept and `false`
    /// is returned.
    pub fn register(&mut self, store: Datastore) -> bool {
        if self.stores.contains_key(store.name()) {
            warn!(store = %store.name(), "store already registered, ignoring");
            return false;
        }
        info!(store = %store.name(), path = %store.path().display(), "registered store");
        self.stores.insert(store.name().to_string(), store);
        true
    }

    pub fn get(&self, name: &str) -> Result<&Datastore> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Datastore> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Drop every table of the named stores (all stores when `None`) and
    /// remove them from the registry. Names are checked before anything is
    /// dropped.
    pub fn reset(&mut self, names: Option<&[&str]>) -> Result<Vec<String>> {
        let targets: Vec<String> = match names {
            Some(names) => {
                if let Some(missing) = names.iter().find(|n| !self.stores.contains_key(**n)) {
                    return Err(Error::StoreNotFound(missing.to_string()));
                }
                names.iter().map(|n| n.to_string()).collect()
            }
            None => self.stores.keys().cloned().collect(),
        };

        for name in &targets {
            if let Some(store) = self.stores.get_mut(name) {
                store.drop_tables()?;
            }
            self.stores.shift_remove(name);
        }

        info!(stores = ?targets, "reset stores");
        Ok(targets)
    }

    /// Register a bare handle for every `*.db` file in `dir` that is not
    /// registered yet. Returns the newly added names.
    pub fn discover(&mut self, dir: &Path) -> Result<Vec<String>> {
        let mut found = Vec::new();

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(STORE_EXTENSION)
            })
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if self.stores.contains_key(name) {
                continue;
            }
            self.register(Datastore::new(name, dir));
            found.push(name.to_string());
        }

        if found.is_empty() {
            warn!(dir = %dir.display(), "no unregistered stores found");
        } else {
            info!(dir = %dir.display(), stores = ?found, "discovered stores");
        }
        Ok(found)
    }

    /// Optionally reset everything, then create + register every database in
    /// `config` that is not registered yet. Returns the created store names.
    pub fn create_from_config(
        &mut self,
        config: &SchemaConfig,
        dir: &Path,
        reset: bool,
    ) -> Result<Vec<String>> {
        if reset {
            self.reset(None)?;
        }

        std::fs::create_dir_all(dir)?;

        let mut created = Vec::new();
        for (name, schema) in config.iter() {
            if self.stores.contains_key(name) {
                continue;
            }
            let mut store = Datastore::with_schema(name.clone(), dir, schema.clone());
            store.create_tables()?;
            self.register(store);
            created.push(name.clone());
        }

        info!(stores = ?created, "created stores from config");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = "\
database_name,table_name,header,header_data_type,foreign_key
master,reference,id,text,
master,reference,abbreviation,text,
raw_data,purchases,id,text,
raw_data,sub_items,id,text,
raw_data,sub_items,purchase_id,text,purchases;id
";

    fn config() -> SchemaConfig {
        SchemaConfig::from_reader(CONFIG.as_bytes()).unwrap()
    }

    #[test]
    fn test_register_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let mut registry = DatastoreRegistry::new();

        let schema = config().database("master").unwrap().clone();
        assert!(registry.register(Datastore::with_schema("master", dir.path(), schema)));
        assert!(!registry.register(Datastore::new("master", dir.path())));

        // The schema-bearing handle survived
        assert!(registry.get("master").unwrap().has_schema());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing_store() {
        let registry = DatastoreRegistry::new();
        assert!(matches!(registry.get("raw_data"), Err(Error::StoreNotFound(_))));
    }

    #[test]
    fn test_create_from_config() {
        let dir = tempdir().unwrap();
        let mut registry = DatastoreRegistry::new();

        let created = registry.create_from_config(&config(), dir.path(), false).unwrap();
        assert_eq!(created, vec!["master", "raw_data"]);
        assert_eq!(registry.names(), vec!["master", "raw_data"]);

        let raw = registry.get("raw_data").unwrap();
        assert_eq!(raw.list_tables().unwrap(), vec!["purchases", "sub_items"]);

        // Second call leaves registered stores alone
        assert!(registry.create_from_config(&config(), dir.path(), false).unwrap().is_empty());
    }

    #[test]
    fn test_reset_named_and_all() {
        let dir = tempdir().unwrap();
        let mut registry = DatastoreRegistry::new();
        registry.create_from_config(&config(), dir.path(), false).unwrap();

        assert!(matches!(
            registry.reset(Some(&["nope"][..])),
            Err(Error::StoreNotFound(_))
        ));
        assert_eq!(registry.len(), 2);

        registry.reset(Some(&["raw_data"][..])).unwrap();
        assert_eq!(registry.names(), vec!["master"]);

        let raw = Datastore::new("raw_data", dir.path());
        assert!(raw.list_tables().unwrap().is_empty());

        registry.reset(None).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_discover_adds_bare_handles() {
        let dir = tempdir().unwrap();
        {
            let mut registry = DatastoreRegistry::new();
            registry.create_from_config(&config(), dir.path(), false).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a store").unwrap();

        let mut registry = DatastoreRegistry::new();
        let schema = config().database("master").unwrap().clone();
        registry.register(Datastore::with_schema("master", dir.path(), schema));

        let found = registry.discover(dir.path()).unwrap();
        assert_eq!(found, vec!["raw_data"]);

        let raw = registry.get_mut("raw_data").unwrap();
        assert!(!raw.has_schema());
        assert!(raw.table_names().is_empty());

        raw.refresh_headers().unwrap();
        assert_eq!(raw.table_names(), vec!["purchases", "sub_items"]);
    }
}
