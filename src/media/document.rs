//! A shared document: elements addressed by id, each holding string
//! attributes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
struct Element {
    attributes: HashMap<String, String>,
}

/// Document shared by every context rendered inside it.
///
/// Cloning yields another reference to the same document.
#[derive(Clone, Default)]
pub struct Document {
    elements: Arc<RwLock<HashMap<String, Element>>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, creating the element if it does not exist yet.
    pub fn set_attribute(&self, element_id: &str, name: &str, value: impl Into<String>) {
        let mut elements = self.elements.write();
        elements
            .entry(element_id.to_string())
            .or_default()
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn attribute(&self, element_id: &str, name: &str) -> Option<String> {
        self.elements
            .read()
            .get(element_id)
            .and_then(|e| e.attributes.get(name).cloned())
    }

    pub fn has_element(&self, element_id: &str) -> bool {
        self.elements.read().contains_key(element_id)
    }

    pub fn remove_element(&self, element_id: &str) {
        self.elements.write().remove(element_id);
    }
}
