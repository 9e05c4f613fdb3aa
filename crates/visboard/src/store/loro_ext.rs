//! Typed accessors over raw Loro containers.

use loro::{Container, LoroList, LoroMap, LoroText, LoroValue, ValueOrContainer};

/// Helper trait for collecting and searching values in Loro lists
pub trait LoroListExt {
    /// Collect values by applying a function to each element, keeping only Some results
    fn collect_map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(ValueOrContainer) -> Option<T>;

    /// Find the index of the first element where the function returns Some(true)
    fn find_index<F>(&self, f: F) -> Option<usize>
    where
        F: FnMut(ValueOrContainer) -> Option<bool>;

    /// Index of the first map element whose `key` field equals `value`
    fn position_by_field(&self, key: &str, value: &str) -> Option<usize> {
        self.find_index(|v| match v {
            ValueOrContainer::Container(Container::Map(m)) => {
                m.get_string(key).map(|s| s == value)
            }
            _ => None,
        })
    }
}

impl LoroListExt for LoroList {
    fn collect_map<T, F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(ValueOrContainer) -> Option<T>,
    {
        let mut result = Vec::new();
        self.for_each(|v| {
            if let Some(value) = f(v) {
                result.push(value);
            }
        });
        result
    }

    fn find_index<F>(&self, mut f: F) -> Option<usize>
    where
        F: FnMut(ValueOrContainer) -> Option<bool>,
    {
        let mut index = 0;
        let mut found = None;
        self.for_each(|v| {
            if found.is_none()
                && let Some(true) = f(v)
            {
                found = Some(index);
            }
            index += 1;
        });
        found
    }
}

/// Helper trait for extracting typed values from Loro maps
pub trait LoroMapExt {
    /// Get a value from the map and apply a function to the LoroValue.
    /// Containers are skipped.
    fn get_typed<T, F>(&self, key: &str, f: F) -> Option<T>
    where
        F: FnOnce(&LoroValue) -> Option<T>;

    fn get_string(&self, key: &str) -> Option<String> {
        self.get_typed(key, |val| val.as_string().map(|s| s.to_string()))
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_typed(key, |val| {
            val.as_i64()
                .copied()
                .or_else(|| val.as_double().map(|d| *d as i64))
        })
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_typed(key, |val| {
            val.as_double()
                .copied()
                .or_else(|| val.as_i64().map(|i| *i as f64))
        })
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_typed(key, |val| val.as_bool().copied())
    }

    /// Deserialize a JSON string field.
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_typed(key, |val| {
            val.as_string()
                .and_then(|s| serde_json::from_str(s.as_ref()).ok())
        })
    }

    fn get_map_container(&self, key: &str) -> Option<LoroMap>;

    fn get_list_container(&self, key: &str) -> Option<LoroList>;

    fn get_text_container(&self, key: &str) -> Option<LoroText>;
}

impl LoroMapExt for LoroMap {
    fn get_typed<T, F>(&self, key: &str, f: F) -> Option<T>
    where
        F: FnOnce(&LoroValue) -> Option<T>,
    {
        self.get(key).and_then(|v| match v {
            ValueOrContainer::Value(val) => f(&val),
            _ => None,
        })
    }

    fn get_map_container(&self, key: &str) -> Option<LoroMap> {
        match self.get(key) {
            Some(ValueOrContainer::Container(Container::Map(m))) => Some(m),
            _ => None,
        }
    }

    fn get_list_container(&self, key: &str) -> Option<LoroList> {
        match self.get(key) {
            Some(ValueOrContainer::Container(Container::List(l))) => Some(l),
            _ => None,
        }
    }

    fn get_text_container(&self, key: &str) -> Option<LoroText> {
        match self.get(key) {
            Some(ValueOrContainer::Container(Container::Text(t))) => Some(t),
            _ => None,
        }
    }
}

/// Write an optional string, deleting the key when `None`.
pub fn insert_opt_str(map: &LoroMap, key: &str, value: Option<&str>) -> anyhow::Result<()> {
    match value {
        Some(v) => map.insert(key, v)?,
        None => map.insert(key, LoroValue::Null)?,
    }
    Ok(())
}

/// Write an optional number, storing null when `None`.
pub fn insert_opt_f64(map: &LoroMap, key: &str, value: Option<f64>) -> anyhow::Result<()> {
    match value {
        Some(v) => map.insert(key, v)?,
        None => map.insert(key, LoroValue::Null)?,
    }
    Ok(())
}

/// Replace the whole content of a text container.
pub fn replace_text(text: &LoroText, content: &str) -> anyhow::Result<()> {
    let len = text.len_unicode();
    if len > 0 {
        text.delete(0, len)?;
    }
    if !content.is_empty() {
        text.insert(0, content)?;
    }
    Ok(())
}

/// Append to the end of a text container.
pub fn append_text(text: &LoroText, chunk: &str) -> anyhow::Result<()> {
    if !chunk.is_empty() {
        text.insert(text.len_unicode(), chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loro::LoroDoc;

    #[test]
    fn test_typed_getters() -> anyhow::Result<()> {
        let doc = LoroDoc::new();
        let map = doc.get_map("m");
        map.insert("s", "text")?;
        map.insert("i", 42i64)?;
        map.insert("f", 1.5f64)?;
        map.insert("b", true)?;
        map.insert("j", r#"["a","b"]"#)?;

        assert_eq!(map.get_string("s").as_deref(), Some("text"));
        assert_eq!(map.get_i64("i"), Some(42));
        assert_eq!(map.get_f64("i"), Some(42.0));
        assert_eq!(map.get_f64("f"), Some(1.5));
        assert_eq!(map.get_bool("b"), Some(true));
        assert_eq!(map.get_json::<Vec<String>>("j"), Some(vec!["a".into(), "b".into()]));
        assert_eq!(map.get_string("missing"), None);
        Ok(())
    }

    #[test]
    fn test_text_helpers() -> anyhow::Result<()> {
        let doc = LoroDoc::new();
        let map = doc.get_map("m");
        let text = map.insert_container("t", LoroText::new())?;

        append_text(&text, "Hel")?;
        append_text(&text, "lo ✓")?;
        assert_eq!(text.to_string(), "Hello ✓");

        replace_text(&text, "fresh")?;
        assert_eq!(map.get_text_container("t").map(|t| t.to_string()).as_deref(), Some("fresh"));
        Ok(())
    }

    #[test]
    fn test_position_by_field() -> anyhow::Result<()> {
        let doc = LoroDoc::new();
        let list = doc.get_list("l");
        for id in ["a", "b", "c"] {
            let m = list.push_container(LoroMap::new())?;
            m.insert("id", id)?;
        }
        assert_eq!(list.position_by_field("id", "b"), Some(1));
        assert_eq!(list.position_by_field("id", "z"), None);
        Ok(())
    }
}
