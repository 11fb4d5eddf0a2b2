//! Flat joined rows back into nested records.
//!
//! `{"id": 1, "author.id": 2, "author.profile.picture": "x"}` becomes
//! `{"id": 1, "author": {"id": 2, "profile": {"picture": "x"}}}`.

use serde_json::Value as Json;

use crate::value::Record;

/// Split dotted keys into nested objects, keeping key order.
pub fn unflatten(row: Record) -> Record {
    let mut out = Record::new();
    for (key, value) in row {
        if !key.contains('.') {
            out.insert(key, value);
            continue;
        }
        let mut parts = key.split('.').peekable();
        let mut target = &mut out;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                target.insert(part.to_string(), value);
                break;
            }
            let slot = target
                .entry(part.to_string())
                .or_insert_with(|| Json::Object(Record::new()));
            if !slot.is_object() {
                // A scalar under the same name loses to the joined object.
                *slot = Json::Object(Record::new());
            }
            let Json::Object(map) = slot else {
                break;
            };
            target = map;
        }
    }
    out
}

/// Apply [`unflatten`] to every row.
pub fn unflatten_rows(rows: Vec<Record>) -> Vec<Record> {
    rows.into_iter().map(unflatten).collect()
}
