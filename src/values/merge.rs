//! Deep merge of layered values trees.
//!
//! Overlapping mappings merge recursively. Any other overlapping value
//! (scalar, sequence, null, tagged) is replaced by the overlay wholesale;
//! sequences are never concatenated.

use serde_yaml::{Mapping, Value};

/// Merge `overlay` on top of `base`, returning a new tree.
///
/// Neither input is modified. Keys only present in `base` keep their value
/// and position; keys only present in `overlay` are appended in overlay order.
pub fn merge(base: &Mapping, overlay: &Mapping) -> Mapping {
    let mut merged = base.clone();

    for (key, value) in overlay {
        let next = match (merged.get(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                Value::Mapping(merge(existing, incoming))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }

    merged
}
