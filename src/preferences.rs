use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::warn;

use crate::model::SortKey;
use crate::storage::Store;

pub const COMMENT_SORTING_KEY: &str = "comment-sorting";
pub const POST_SORTING_KEY: &str = "post-sorting";

/// Durable key/value backing for remembered choices.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl PreferenceStore for Store {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_preference(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_preference(key, value)
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Remembered post and comment ordering.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferences::default()))
    }

    pub fn comment_sorting(&self) -> SortKey {
        self.sorting(COMMENT_SORTING_KEY)
    }

    pub fn set_comment_sorting(&self, sort: SortKey) -> Result<()> {
        self.store.set(COMMENT_SORTING_KEY, sort.as_str())
    }

    pub fn post_sorting(&self) -> SortKey {
        self.sorting(POST_SORTING_KEY)
    }

    pub fn set_post_sorting(&self, sort: SortKey) -> Result<()> {
        self.store.set(POST_SORTING_KEY, sort.as_str())
    }

    /// Reads a sort preference, writing the default back when none (or an
    /// unknown value) is stored.
    fn sorting(&self, key: &str) -> SortKey {
        let stored = match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %format!("{err:#}"), "preferences: read failed");
                None
            }
        };
        let sort = stored.as_deref().map(SortKey::from_key).unwrap_or_default();
        if stored.as_deref() != Some(sort.as_str()) {
            if let Err(err) = self.store.set(key, sort.as_str()) {
                warn!(key, error = %format!("{err:#}"), "preferences: write-back failed");
            }
        }
        sort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Options;

    #[test]
    fn missing_value_defaults_and_is_written_back() {
        let backing = Arc::new(MemoryPreferences::default());
        let prefs = Preferences::new(backing.clone());
        assert_eq!(prefs.comment_sorting(), SortKey::Newest);
        assert_eq!(
            backing.get(COMMENT_SORTING_KEY).unwrap().as_deref(),
            Some("newest")
        );
    }

    #[test]
    fn unknown_value_is_replaced() {
        let backing = Arc::new(MemoryPreferences::default());
        backing.set(POST_SORTING_KEY, "sideways").unwrap();
        let prefs = Preferences::new(backing.clone());
        assert_eq!(prefs.post_sorting(), SortKey::Newest);
        assert_eq!(backing.get(POST_SORTING_KEY).unwrap().as_deref(), Some("newest"));
    }

    #[test]
    fn persists_through_store() {
        let store = Store::open(Options {
            in_memory: true,
            ..Default::default()
        })
        .unwrap();
        let prefs = Preferences::new(Arc::new(store.clone()));
        prefs.set_post_sorting(SortKey::Top).unwrap();
        prefs.set_comment_sorting(SortKey::Oldest).unwrap();
        assert_eq!(prefs.post_sorting(), SortKey::Top);
        assert_eq!(store.get_preference(COMMENT_SORTING_KEY).unwrap().as_deref(), Some("oldest"));
    }
}
