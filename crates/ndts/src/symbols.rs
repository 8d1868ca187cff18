//! Bidirectional symbol dictionary.
//!
//! Ids are dense, assigned in insertion order and never reused; files store
//! symbol columns as these ids. Persisted as
//! `{"next": N, "entries": [{"id": 0, "name": "..."}, ...]}` sorted by id,
//! written back eagerly whenever a new symbol appears.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NdtsError, Result};

#[derive(Serialize, Deserialize)]
struct DictEntry {
    id: u32,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct DictFile {
    next: u32,
    entries: Vec<DictEntry>,
}

pub struct SymbolDict {
    path: PathBuf,
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl SymbolDict {
    /// Load the dictionary at `path`, empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<SymbolDict> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(SymbolDict {
                path,
                names: Vec::new(),
                ids: HashMap::new(),
            });
        }
        let bytes = fs::read(&path).map_err(|e| NdtsError::io(&path, e))?;
        let file: DictFile = serde_json::from_slice(&bytes).map_err(|e| {
            NdtsError::corruption(&path, 0, bytes.len() as u64, format!("bad dictionary: {e}"))
        })?;

        let mut names = Vec::with_capacity(file.entries.len());
        let mut ids = HashMap::with_capacity(file.entries.len());
        for (i, entry) in file.entries.iter().enumerate() {
            if entry.id as usize != i {
                return Err(NdtsError::corruption(
                    &path,
                    0,
                    bytes.len() as u64,
                    format!("ids not dense: entry {i} has id {}", entry.id),
                ));
            }
            if ids.insert(entry.name.clone(), entry.id).is_some() {
                return Err(NdtsError::corruption(
                    &path,
                    0,
                    bytes.len() as u64,
                    format!("duplicate symbol {}", entry.name),
                ));
            }
            names.push(entry.name.clone());
        }
        if file.next as usize != names.len() {
            return Err(NdtsError::corruption(
                &path,
                0,
                bytes.len() as u64,
                format!("next is {}, but {} entries exist", file.next, names.len()),
            ));
        }

        Ok(SymbolDict { path, names, ids })
    }

    /// Idempotent id assignment; a new symbol is persisted immediately.
    pub fn get_or_create_id(&mut self, name: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        self.save()?;
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let file = DictFile {
            next: self.names.len() as u32,
            entries: self
                .names
                .iter()
                .enumerate()
                .map(|(i, name)| DictEntry {
                    id: i as u32,
                    name: name.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_vec(&file)
            .map_err(|e| NdtsError::state(format!("dictionary serialization failed: {e}")))?;
        fs::write(&self.path, json).map_err(|e| NdtsError::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.json");

        let mut dict = SymbolDict::open(&path).unwrap();
        assert_eq!(dict.get_or_create_id("BTCUSD").unwrap(), 0);
        assert_eq!(dict.get_or_create_id("ETHUSD").unwrap(), 1);
        assert_eq!(dict.get_or_create_id("BTCUSD").unwrap(), 0);
        assert_eq!(dict.len(), 2);

        let dict = SymbolDict::open(&path).unwrap();
        assert_eq!(dict.id("ETHUSD"), Some(1));
        assert_eq!(dict.name(0), Some("BTCUSD"));
        assert_eq!(dict.name(7), None);
        assert_eq!(dict.id("missing"), None);
    }

    #[test]
    fn test_file_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.json");
        let mut dict = SymbolDict::open(&path).unwrap();
        dict.get_or_create_id("AAPL").unwrap();
        dict.get_or_create_id("MSFT").unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["next"], 2);
        assert_eq!(json["entries"][0]["id"], 0);
        assert_eq!(json["entries"][0]["name"], "AAPL");
        assert_eq!(json["entries"][1]["id"], 1);
    }

    #[test]
    fn test_non_dense_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.json");
        fs::write(
            &path,
            r#"{"next":2,"entries":[{"id":0,"name":"A"},{"id":5,"name":"B"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            SymbolDict::open(&path),
            Err(NdtsError::Corruption { .. })
        ));
    }
}
