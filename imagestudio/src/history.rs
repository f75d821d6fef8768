use serde::{Deserialize, Serialize};

use crate::utils::now_utc_iso;

/// A past successful generation. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub src: String,
    pub prompt: String,
}

/// The image currently on display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentImage {
    pub src: String,
    pub prompt: String,
}

impl From<&HistoryItem> for CurrentImage {
    fn from(item: &HistoryItem) -> Self {
        Self {
            src: item.src.clone(),
            prompt: item.prompt.clone(),
        }
    }
}

/// Session-local list of generations, newest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    items: Vec<HistoryItem>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HistoryItem> {
        self.items.get(index)
    }

    /// Prepends a record stamped with the current time.
    pub fn record(&mut self, image: &CurrentImage) -> &HistoryItem {
        let id = self.unique_id(now_utc_iso());
        self.items.insert(
            0,
            HistoryItem {
                id,
                src: image.src.clone(),
                prompt: image.prompt.clone(),
            },
        );
        &self.items[0]
    }

    // Two generations can land in the same millisecond; suffix until unique.
    fn unique_id(&self, base: String) -> String {
        if !self.contains_id(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.contains_id(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn contains_id(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }
}
