//! Canned [`MetadataSource`] keyed by URI.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bazaar::metadata::{DocumentTrait, MetadataError, MetadataSource, TokenDocument};

#[derive(Default)]
pub struct StaticMetadata {
    documents: Mutex<HashMap<String, TokenDocument>>,
}

impl StaticMetadata {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, uri: &str, document: TokenDocument) {
        self.documents
            .lock()
            .unwrap()
            .insert(uri.to_string(), document);
    }

    pub fn remove(&self, uri: &str) {
        self.documents.lock().unwrap().remove(uri);
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn fetch(&self, uri: &str) -> Result<TokenDocument, MetadataError> {
        self.documents
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| MetadataError::Unavailable(uri.to_string()))
    }
}

/// Builds a document with the given traits.
pub fn document(name: &str, image: &str, traits: &[(&str, &str)]) -> TokenDocument {
    TokenDocument {
        name: name.to_string(),
        description: format!("{name} description"),
        image: image.to_string(),
        attributes: traits
            .iter()
            .map(|(trait_type, value)| DocumentTrait {
                trait_type: (*trait_type).to_string(),
                value: (*value).to_string(),
            })
            .collect(),
    }
}
