use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Decides whether connection params carry anything usable.
///
/// The stream store refuses to open a stream for blank params. JSON values
/// follow the usual falsy rules: `null`, `false`, `0`, `""` and empty arrays
/// are blank, and an object is blank when it has no keys or every value is
/// blank.
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for Value {
    fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0 || f.is_nan()),
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.values().all(Blank::is_blank),
        }
    }
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for &str {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Blank> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        self.as_ref().map_or(true, Blank::is_blank)
    }
}

impl<S> Blank for HashMap<String, String, S> {
    fn is_blank(&self) -> bool {
        self.values().all(String::is_empty)
    }
}

impl Blank for BTreeMap<String, String> {
    fn is_blank(&self) -> bool {
        self.values().all(String::is_empty)
    }
}
