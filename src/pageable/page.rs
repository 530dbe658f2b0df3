use serde::{Deserialize, Serialize};

/// Cursor value stored once the server signals there is nothing more to read.
pub const END_OF_DATA: &str = "";

/// One page returned by a fetch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T, M = ()> {
    pub data: Vec<T>,
    #[serde(default)]
    pub metadata: Option<M>,
    /// Token for the next page. `None` or an empty string ends pagination.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl<T, M> Page<T, M> {
    /// A page followed by more data at `cursor`.
    pub fn new(data: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            data,
            metadata: None,
            cursor: Some(cursor.into()),
        }
    }

    /// The final page.
    pub fn last(data: Vec<T>) -> Self {
        Self {
            data,
            metadata: None,
            cursor: None,
        }
    }

    pub fn with_metadata(mut self, metadata: M) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The cursor to store, normalised so a missing cursor becomes the
    /// end-of-data sentinel.
    pub(crate) fn next_cursor(&self) -> String {
        self.cursor.clone().unwrap_or_else(|| END_OF_DATA.to_string())
    }
}
