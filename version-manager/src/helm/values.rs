use crate::model::Values;

/// Merges overrides into the existing values of a release. This is a shallow merge: a key which
/// is present in both takes the override's whole value, even when both values are maps. Keys
/// which are only in existing are kept as they are.
pub fn merge_values(existing: &Values, overrides: Option<&Values>) -> Values {
    let mut merged = existing.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::merge_values;
    use crate::model::Values;
    use serde_json::{json, Value};

    fn values(value: Value) -> Values {
        match value {
            Value::Object(map) => map,
            _ => panic!("test values must be a JSON object"),
        }
    }

    #[test]
    fn test_merge_keeps_siblings() {
        let existing = values(json!({"x": 1, "y": 2}));
        let overrides = values(json!({"x": 5}));

        assert_eq!(
            merge_values(&existing, Some(&overrides)),
            values(json!({"x": 5, "y": 2}))
        );
    }

    #[test]
    fn test_merge_is_shallow() {
        let existing = values(json!({
            "image": {"repository": "example/checkout", "tag": "1.0.0"},
            "replicas": 2
        }));
        let overrides = values(json!({"image": {"tag": "1.1.0"}}));

        assert_eq!(
            merge_values(&existing, Some(&overrides)),
            values(json!({"image": {"tag": "1.1.0"}, "replicas": 2}))
        );
    }

    #[test]
    fn test_merge_without_overrides() {
        let existing = values(json!({"replicas": 2}));

        assert_eq!(merge_values(&existing, None), existing);
        assert_eq!(merge_values(&existing, Some(&Values::new())), existing);
        assert_eq!(
            merge_values(&Values::new(), Some(&existing)),
            values(json!({"replicas": 2}))
        );
    }
}
