use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::error::StoreError;

/// A saved design: an id plus its ordered component sequence.
///
/// This is the persistence shape handed to (and loaded from) the REST
/// backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesignDocument {
    pub id: String,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl DesignDocument {
    pub fn new(id: impl Into<String>, components: Vec<Component>) -> Self {
        Self {
            id: id.into(),
            components,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::InvalidDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::InvalidDocument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json() {
        let doc = DesignDocument::new("d1", vec![Component::new("a", "text")]);
        let raw = doc.to_json().unwrap();
        assert_eq!(DesignDocument::from_json(&raw).unwrap(), doc);
    }

    #[test]
    fn test_document_defaults_and_errors() {
        let doc = DesignDocument::from_json(r#"{"id":"empty"}"#).unwrap();
        assert!(doc.components.is_empty());
        assert!(matches!(
            DesignDocument::from_json("{not json"),
            Err(StoreError::InvalidDocument(_))
        ));
    }
}
