//! The morphology document model (component B).
//!
//! A morphology is a JSON document with a `kind` discriminator and an
//! otherwise free-form set of top-level keys. Rather than modeling
//! `Chunk`/`Stratum`/`System` as a class hierarchy, this is a single
//! [`Morphology`] record carrying whatever keys the document had, plus
//! typed accessors for the handful of keys the rest of this crate actually
//! reads or rewrites (`strata`, `chunks`, `repo`, `ref`, `morph`, `name`).

use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value};

mod error;
pub use error::MorphologyError;

/// Which array a [`lookup_index_by_name`](Morphology::lookup_index_by_name)
/// call should search: a system's `strata`, or a stratum's `chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Strata,
    Chunks,
}

impl Collection {
    fn key(self) -> &'static str {
        match self {
            Collection::Strata => "strata",
            Collection::Chunks => "chunks",
        }
    }
}

/// The `kind` discriminator of a morphology document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Chunk,
    Stratum,
    System,
}

impl Kind {
    fn parse(s: &str) -> Option<Kind> {
        match s {
            "chunk" => Some(Kind::Chunk),
            "stratum" => Some(Kind::Stratum),
            "system" => Some(Kind::System),
            _ => None,
        }
    }
}

/// A parsed morphology document, preserving the insertion order of its
/// top-level keys (`serde_json`'s `preserve_order` feature backs [`Map`]
/// with an order-preserving map).
#[derive(Debug, Clone, PartialEq)]
pub struct Morphology {
    pub doc: Map<String, Value>,
}

impl Morphology {
    pub fn parse(text: &str) -> Result<Self, MorphologyError> {
        let value: Value = serde_json::from_str(text)?;
        let doc = value
            .as_object()
            .cloned()
            .ok_or_else(|| MorphologyError::NotAnObject)?;
        Ok(Morphology { doc })
    }

    pub fn load(path: &Path) -> Result<Self, MorphologyError> {
        let text = fs::read_to_string(path).map_err(MorphologyError::Io)?;
        Self::parse(&text)
    }

    pub fn kind(&self) -> Result<Kind, MorphologyError> {
        let raw = self
            .doc
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(MorphologyError::MissingKind)?;
        Kind::parse(raw).ok_or_else(|| MorphologyError::UnknownKind(raw.to_string()))
    }

    /// Find the index of the entry named `name` inside `collection`
    /// (`strata` for a system, `chunks` for a stratum).
    pub fn lookup_index_by_name(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<usize, MorphologyError> {
        let array = self
            .doc
            .get(collection.key())
            .and_then(Value::as_array)
            .ok_or_else(|| MorphologyError::ComponentNotFound {
                collection,
                name: name.to_string(),
            })?;

        array
            .iter()
            .position(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
            .ok_or_else(|| MorphologyError::ComponentNotFound {
                collection,
                name: name.to_string(),
            })
    }

    /// Mutable access to the entry named `name` inside `collection`.
    pub fn entry_mut(
        &mut self,
        collection: Collection,
        name: &str,
    ) -> Result<&mut Map<String, Value>, MorphologyError> {
        let idx = self.lookup_index_by_name(collection, name)?;
        let array = self
            .doc
            .get_mut(collection.key())
            .and_then(Value::as_array_mut)
            .expect("index was just found in this array");
        array[idx]
            .as_object_mut()
            .ok_or(MorphologyError::NotAnObject)
    }

    /// Read-only access to the entry named `name` inside `collection`.
    pub fn entry(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<&Map<String, Value>, MorphologyError> {
        let idx = self.lookup_index_by_name(collection, name)?;
        self.doc
            .get(collection.key())
            .and_then(Value::as_array)
            .and_then(|a| a[idx].as_object())
            .ok_or(MorphologyError::NotAnObject)
    }

    /// Iterate every entry of `collection` (strata of a system, or chunks of
    /// a stratum), read-only.
    pub fn entries(&self, collection: Collection) -> impl Iterator<Item = &Map<String, Value>> {
        self.doc
            .get(collection.key())
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
    }

    /// Iterate every entry of `collection`, mutably.
    pub fn entries_mut(
        &mut self,
        collection: Collection,
    ) -> impl Iterator<Item = &mut Map<String, Value>> {
        self.doc
            .get_mut(collection.key())
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object_mut)
    }

    /// Canonical on-disk form: top-level keys sorted lexicographically, empty
    /// (string/array/object) or `false`/`null` top-level values dropped,
    /// pretty-printed, trailing newline. Shared by [`Self::save`] and by the
    /// build-ref synthesizer, which commits this same form into git without
    /// going through the filesystem.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, MorphologyError> {
        let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
        for (k, v) in &self.doc {
            if !is_empty_value(v) {
                sorted.insert(k.clone(), v.clone());
            }
        }
        let ordered: Map<String, Value> = sorted.into_iter().collect();
        let mut text = serde_json::to_string_pretty(&Value::Object(ordered))?;
        text.push('\n');
        Ok(text.into_bytes())
    }

    /// Serialize to `path` via [`Self::to_canonical_bytes`], atomic write
    /// (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), MorphologyError> {
        let bytes = self.to_canonical_bytes()?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(MorphologyError::Io)?;
        use io::Write;
        tmp.write_all(&bytes).map_err(MorphologyError::Io)?;
        tmp.persist(path)
            .map_err(|e| MorphologyError::Io(e.error))?;
        Ok(())
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !*b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// Convenience accessors shared by every entry that names a repo/ref pair
/// (`strata` entries of a system, `chunks` entries of a stratum).
pub trait EntryExt {
    fn repo(&self) -> Option<&str>;
    fn ref_(&self) -> Option<&str>;
    fn morph(&self) -> Option<&str>;
    fn set_ref(&mut self, value: impl Into<String>);
}

impl EntryExt for Map<String, Value> {
    fn repo(&self) -> Option<&str> {
        self.get("repo").and_then(Value::as_str)
    }
    fn ref_(&self) -> Option<&str> {
        self.get("ref").and_then(Value::as_str)
    }
    fn morph(&self) -> Option<&str> {
        self.get("morph").and_then(Value::as_str)
    }
    fn set_ref(&mut self, value: impl Into<String>) {
        self.insert("ref".to_string(), Value::String(value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_text() -> &'static str {
        r#"{
            "name": "my-system",
            "kind": "system",
            "strata": [
                {"repo": "morphs", "ref": "master", "morph": "bar", "name": "bar"}
            ],
            "configuration-extensions": []
        }"#
    }

    #[test]
    fn parse_preserves_insertion_order() {
        let m = Morphology::parse(r#"{"zebra": 1, "kind": "chunk", "apple": 2}"#).unwrap();
        let keys: Vec<&String> = m.doc.keys().collect();
        assert_eq!(keys, vec!["zebra", "kind", "apple"]);
    }

    #[test]
    fn lookup_child_by_name_finds_stratum() {
        let m = Morphology::parse(system_text()).unwrap();
        let entry = m.entry(Collection::Strata, "bar").unwrap();
        assert_eq!(entry.repo(), Some("morphs"));
        assert_eq!(entry.ref_(), Some("master"));
    }

    #[test]
    fn lookup_child_by_name_missing_is_an_error() {
        let m = Morphology::parse(system_text()).unwrap();
        let err = m.entry(Collection::Strata, "nope").unwrap_err();
        assert!(matches!(err, MorphologyError::ComponentNotFound { .. }));
    }

    #[test]
    fn save_drops_empty_keys_and_sorts() {
        let m = Morphology::parse(system_text()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my-system.morph");
        m.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("configuration-extensions"));
        assert!(text.ends_with('\n'));
        let kind_pos = text.find("\"kind\"").unwrap();
        let name_pos = text.find("\"name\"").unwrap();
        let strata_pos = text.find("\"strata\"").unwrap();
        assert!(kind_pos < name_pos);
        assert!(name_pos < strata_pos);
    }

    #[test]
    fn save_then_load_round_trips() {
        let m = Morphology::parse(system_text()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my-system.morph");
        m.save(&path).unwrap();
        let reloaded = Morphology::load(&path).unwrap();
        assert_eq!(reloaded.kind().unwrap(), Kind::System);
        let entry = reloaded.entry(Collection::Strata, "bar").unwrap();
        assert_eq!(entry.ref_(), Some("master"));
    }

    #[test]
    fn set_ref_mutates_entry_in_place() {
        let mut m = Morphology::parse(system_text()).unwrap();
        {
            let entry = m.entry_mut(Collection::Strata, "bar").unwrap();
            entry.set_ref("feature-branch");
        }
        assert_eq!(
            m.entry(Collection::Strata, "bar").unwrap().ref_(),
            Some("feature-branch")
        );
    }
}
