// src/sync/embedded_path.rs
// Locating embedded copies inside array columns of a target record

use crate::model::Record;
use crate::value_utils::{get_nested_value, remove_nested_value, set_nested_value};
use serde_json::Value;

/// Sync column split at its first dot: `orders.customer` keeps copies under
/// `customer` of each element in the `orders` array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedPath<'c> {
    pub top: &'c str,
    pub nested: Option<&'c str>,
}

impl<'c> EmbeddedPath<'c> {
    pub fn parse(column: &'c str) -> Self {
        match column.split_once('.') {
            Some((top, nested)) => EmbeddedPath {
                top,
                nested: Some(nested),
            },
            None => EmbeddedPath { top: column, nested: None },
        }
    }

    /// The embedded copy held by one array element
    fn copy_in<'v>(&self, element: &'v Value) -> Option<&'v Value> {
        match self.nested {
            Some(nested) => get_nested_value(element, nested),
            None => Some(element),
        }
    }

    /// Indexes of the elements whose embedded copy has `id` under `id_column`
    pub fn locate(&self, list: &[Value], id: &Value, id_column: &str) -> Vec<usize> {
        list.iter()
            .enumerate()
            .filter(|(_, element)| {
                self.copy_in(element)
                    .and_then(|copy| copy.get(id_column))
                    .is_some_and(|found| found == id)
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn list(&self, record: &Record) -> Option<Vec<Value>> {
        match record.get(self.top) {
            Some(Value::Array(items)) if !items.is_empty() => Some(items.clone()),
            _ => None,
        }
    }

    /// Overwrite the matching embedded copies with `payload`
    ///
    /// Returns whether any element matched; other elements are untouched.
    pub fn replace(&self, record: &mut Record, id: &Value, id_column: &str, payload: &Value) -> bool {
        let Some(mut list) = self.list(record) else {
            return false;
        };
        let matches = self.locate(&list, id, id_column);
        if matches.is_empty() {
            return false;
        }
        for index in matches {
            match self.nested {
                Some(nested) => set_nested_value(&mut list[index], nested, payload.clone()),
                None => list[index] = payload.clone(),
            }
        }
        record.set(self.top, Value::Array(list));
        true
    }

    /// Drop the matching embedded copies
    ///
    /// With a nested path only the copy is removed and the element stays;
    /// without one the whole element is removed.
    pub fn remove(&self, record: &mut Record, id: &Value, id_column: &str) -> bool {
        let Some(mut list) = self.list(record) else {
            return false;
        };
        let matches = self.locate(&list, id, id_column);
        if matches.is_empty() {
            return false;
        }
        match self.nested {
            Some(nested) => {
                for index in matches {
                    remove_nested_value(&mut list[index], nested);
                }
            }
            None => {
                for index in matches.into_iter().rev() {
                    list.remove(index);
                }
            }
        }
        record.set(self.top, Value::Array(list));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shop() -> Record {
        Record::from_document(
            json!({
                "_id": "s1",
                "orders": [
                    {"sku": "a", "customer": {"id": 1, "name": "Ada"}},
                    {"sku": "b", "customer": {"id": 2, "name": "Grace"}},
                    {"sku": "c", "customer": {"id": 1, "name": "Ada"}}
                ]
            })
            .as_object()
            .cloned()
            .unwrap(),
        )
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            EmbeddedPath::parse("orders.customer"),
            EmbeddedPath {
                top: "orders",
                nested: Some("customer")
            }
        );
        assert_eq!(EmbeddedPath::parse("author").nested, None);
    }

    #[test]
    fn test_replace_nested_copies() {
        let mut record = shop();
        let path = EmbeddedPath::parse("orders.customer");
        let payload = json!({"id": 1, "name": "Ada Lovelace"});

        assert!(path.replace(&mut record, &json!(1), "id", &payload));
        let orders = record.get("orders").unwrap();
        assert_eq!(orders[0]["customer"], payload);
        assert_eq!(orders[2]["customer"], payload);
        assert_eq!(orders[1], json!({"sku": "b", "customer": {"id": 2, "name": "Grace"}}));

        assert!(!path.replace(&mut record, &json!(9), "id", &payload));
    }

    #[test]
    fn test_remove_keeps_elements_for_nested_paths() {
        let mut record = shop();
        assert!(EmbeddedPath::parse("orders.customer").remove(&mut record, &json!(2), "id"));
        assert_eq!(record.get("orders").unwrap()[1], json!({"sku": "b"}));
        assert_eq!(record.get("orders").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_remove_flat_elements() {
        let mut record = Record::from_document(
            json!({"_id": "p1", "tags": [{"id": 1}, {"id": 2}]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(EmbeddedPath::parse("tags").remove(&mut record, &json!(1), "id"));
        assert_eq!(record.get("tags"), Some(&json!([{"id": 2}])));
    }
}
