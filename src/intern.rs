//! Process-wide canonical string table for frame text.

use dashmap::DashMap;
use once_cell::sync::Lazy;

use std::sync::Arc;

static FRAMES: Lazy<StringTable> = Lazy::new(StringTable::default);

/// Append-only concurrent string set handing out shared `Arc<str>` handles.
#[derive(Debug, Default)]
pub struct StringTable {
    entries: DashMap<Arc<str>, ()>,
}

impl StringTable {
    pub fn intern(&self, text: &str) -> Arc<str> {
        if let Some(hit) = self.entries.get(text) {
            return hit.key().clone();
        }
        self.entries
            .entry(Arc::from(text))
            .or_insert(())
            .key()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Interns into the global frame table.
pub fn intern(text: &str) -> Arc<str> {
    FRAMES.intern(text)
}
