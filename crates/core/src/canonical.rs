//! Canonical index keys.
//!
//! Indexes map a JSON value to a set of document ids. Two distinct
//! `serde_json::Value`s that are semantically equal must produce the
//! same key string; `serde_json::Value`'s `Serialize` impl already
//! writes object keys in a stable (sorted, via the default
//! `BTreeMap`-backed `Map`) order, so compact JSON serialization of the
//! value is already a valid canonical form.

use serde_json::Value;

/// Produce a canonical string key for `value`, suitable for use as an
/// index map key. Returns `None` for `Value::Null`, matching spec.md
/// §4.4: "`undefined` is not indexed" (this port has no `undefined`;
/// `Null` is the nearest analog for "field present but has no value
/// worth indexing on" — see the `Collection` index-maintenance code,
/// which additionally skips entirely-absent fields before ever calling
/// this function).
pub fn canonical_key(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    // `to_string` never fails for an already-constructed `Value`.
    Some(serde_json::to_string(value).expect("Value serialization is infallible"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_not_indexed() {
        assert_eq!(canonical_key(&Value::Null), None);
    }

    #[test]
    fn equal_scalars_produce_equal_keys() {
        assert_eq!(canonical_key(&json!(42)), canonical_key(&json!(42)));
        assert_eq!(canonical_key(&json!("x")), canonical_key(&json!("x")));
    }

    #[test]
    fn distinct_scalars_produce_distinct_keys() {
        assert_ne!(canonical_key(&json!(42)), canonical_key(&json!("42")));
        assert_ne!(canonical_key(&json!(true)), canonical_key(&json!(1)));
    }

    #[test]
    fn objects_with_same_keys_in_different_insertion_order_are_equal() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }
}
