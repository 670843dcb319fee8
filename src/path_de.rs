//! Schema JSON loading with JSON-path context in error messages.
//!
//! A schema document is an object mapping names to definitions:
//! `{ "Point": { "kind": "struct", "shape": "object", "fields": [...] } }`.
//! Entries keep document order, and repeated names are kept so that
//! compilation can reject them.

use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::ast::Definition;
use crate::error::LoadError;

pub type Definitions = Vec<(String, Definition)>;

pub fn definitions_from_str(src: &str) -> Result<Definitions, LoadError> {
    from_str_with_path::<DefinitionList>(src).map(|list| list.0)
}

pub fn definitions_from_slice(bytes: &[u8]) -> Result<Definitions, LoadError> {
    from_slice_with_path::<DefinitionList>(bytes).map(|list| list.0)
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, LoadError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_load_error)
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LoadError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_load_error)
}

fn into_load_error(err: serde_path_to_error::Error<serde_json::Error>) -> LoadError {
    LoadError {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ORDERED MULTIMAP
// ————————————————————————————————————————————————————————————————————————————

struct DefinitionList(Definitions);

impl<'de> Deserialize<'de> for DefinitionList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = DefinitionList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping type names to definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, def)) = map.next_entry::<String, Definition>()? {
                    out.push((name, def));
                }
                Ok(DefinitionList(out))
            }
        }

        deserializer.deserialize_map(ListVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_repeated_names() {
        let src = r#"{
            "B": { "kind": "struct", "shape": "empty" },
            "A": { "kind": "alias", "target": { "ref": "named", "name": "u8" } },
            "B": { "kind": "struct", "shape": "empty" }
        }"#;
        let defs = definitions_from_str(src).unwrap();
        let names: Vec<_> = defs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["B", "A", "B"]);
        assert!(crate::compile(defs).is_err());
    }

    #[test]
    fn errors_name_the_offending_node() {
        let src = br#"{
            "Point": {
                "kind": "struct",
                "shape": "object",
                "fields": [
                    { "field": "typed", "key": "x", "ty": { "ref": "named", "name": "ivar" } },
                    { "field": "typed", "key": "y", "ty": { "ref": "bogus" } }
                ]
            }
        }"#;
        let err = definitions_from_slice(src).unwrap_err();
        assert!(err.path.starts_with("Point"), "{}", err.path);
        assert!(err.to_string().starts_with("at JSON path Point"));
    }

    #[test]
    fn loaded_schemas_compile() {
        let src = r#"{
            "Point": {
                "kind": "struct",
                "shape": "object",
                "fields": [
                    { "field": "typed", "key": "x", "ty": { "ref": "named", "name": "ivar" } },
                    { "field": "typed", "key": "y", "ty": { "ref": "named", "name": "ivar" } }
                ]
            }
        }"#;
        let schema = crate::compile(definitions_from_str(src).unwrap()).unwrap();
        let codec = schema.get("Point").unwrap();
        let bytes = codec.encode(&serde_json::json!({ "x": 3, "y": 19 })).unwrap();
        assert_eq!(hex::encode(bytes), "0626");
    }
}
