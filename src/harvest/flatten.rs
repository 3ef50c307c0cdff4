//! Nested-to-flat record transformation.
//!
//! A [`RecordFlattener`] expands one [`RawRecord`] into rows following its
//! [`FlattenSpec`]: parent fields are copied into every row, each configured
//! nesting level multiplies the rows (interval × status for two levels), and
//! entities without sub-states produce one null-padded row or none, depending
//! on `emit_empty_as_row`.

use serde_json::{Map, Value};

use crate::harvest::traits::{FieldMapping, FlattenSpec, SubStateLevel};
use crate::model::{FlatRow, RawRecord};

#[derive(Debug, Clone)]
pub struct RecordFlattener {
    spec: FlattenSpec,
}

impl RecordFlattener {
    pub fn new(spec: FlattenSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &FlattenSpec {
        &self.spec
    }

    /// Reads the entity id of `record`. Numeric ids are stringified.
    pub fn entity_id(&self, record: &RawRecord) -> Option<String> {
        match lookup(record, &self.spec.entity_id) {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn flatten(&self, record: &RawRecord) -> Vec<FlatRow> {
        let mut base = FlatRow::new();
        copy_fields(&mut base, record, &self.spec.parent_fields);

        if self.spec.levels.is_empty() {
            return vec![base];
        }

        let mut rows = Vec::new();
        expand(record, &self.spec.levels, &base, &mut rows);

        if rows.is_empty() && self.spec.emit_empty_as_row {
            let mut row = base;
            for field in self.spec.levels.iter().flat_map(|level| &level.fields) {
                row.insert(field.column.as_str(), Value::Null);
            }
            rows.push(row);
        }
        rows
    }
}

fn expand(
    parent: &Map<String, Value>,
    levels: &[SubStateLevel],
    row: &FlatRow,
    out: &mut Vec<FlatRow>,
) {
    let Some((level, rest)) = levels.split_first() else {
        out.push(row.clone());
        return;
    };

    let Some(items) = parent.get(&level.list_field).and_then(Value::as_array) else {
        return;
    };

    for item in items.iter().filter_map(Value::as_object) {
        let mut next = row.clone();
        copy_fields(&mut next, item, &level.fields);
        expand(item, rest, &next, out);
    }
}

fn copy_fields(row: &mut FlatRow, source: &Map<String, Value>, fields: &[FieldMapping]) {
    for field in fields {
        row.insert(field.column.as_str(), lookup(source, &field.source));
    }
}

/// Resolves a dotted path; anything missing reads as `null`.
fn lookup(source: &Map<String, Value>, path: &str) -> Value {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else {
        return Value::Null;
    };
    let mut current = source.get(first);
    for part in parts {
        current = current.and_then(|v| v.get(part));
    }
    current.cloned().unwrap_or(Value::Null)
}
