//! Engine-native result shapes returned by adapters.

use serde_json::Value;

use crate::tabular::{ColumnType, Warning};

/// A single value as an adapter decoded it.
///
/// Adapters unwrap engine-specific date and timestamp encodings into
/// [`NativeValue::Text`] before returning.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact decimal kept as text.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl NativeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Whether first-row inference should treat this value as numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            NativeValue::Int(_) | NativeValue::UInt(_) | NativeValue::Float(_) | NativeValue::Decimal(_)
        )
    }

    /// Structural conversion of an untyped JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => NativeValue::Null,
            Value::Bool(b) => NativeValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    NativeValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    NativeValue::UInt(u)
                } else {
                    NativeValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => NativeValue::Text(s),
            other => NativeValue::Json(other),
        }
    }
}

/// Where a field's [`ColumnType`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    Schema,
    Inferred,
}

/// Column metadata reported by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Engine type name or code as reported.
    pub native_type: Option<String>,
    /// Resolved type; `None` until schema or inference supplies one.
    pub kind: Option<ColumnType>,
    pub origin: TypeOrigin,
}

impl FieldDescriptor {
    /// A field whose type the engine reported.
    pub fn typed(name: impl Into<String>, native_type: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            native_type: Some(native_type.into()),
            kind: Some(kind),
            origin: TypeOrigin::Schema,
        }
    }

    /// A field with no schema type.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: None,
            kind: None,
            origin: TypeOrigin::Schema,
        }
    }
}

/// Adapter output: field descriptors plus positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEngineResult {
    pub fields: Vec<FieldDescriptor>,
    pub rows: Vec<Vec<NativeValue>>,
    /// Warnings the adapter recorded, such as schema inference.
    pub warnings: Vec<Warning>,
}

impl RawEngineResult {
    pub fn new(fields: Vec<FieldDescriptor>, rows: Vec<Vec<NativeValue>>) -> Self {
        Self {
            fields,
            rows,
            warnings: Vec::new(),
        }
    }

    /// Resolve every untyped field from the first row.
    ///
    /// A numeric first-row value makes the field FLOAT; anything else,
    /// including NULL or an empty result, makes it STRING. Each inference is
    /// recorded as a [`Warning::SchemaInference`].
    pub fn infer_missing_kinds(&mut self, system: &str) {
        let first = self.rows.first();
        for (index, field) in self.fields.iter_mut().enumerate() {
            if field.kind.is_some() {
                continue;
            }
            let inferred = match first.and_then(|row| row.get(index)) {
                Some(value) if value.is_numeric() => ColumnType::Float,
                _ => ColumnType::String,
            };
            field.kind = Some(inferred);
            field.origin = TypeOrigin::Inferred;

            let warning = Warning::SchemaInference {
                system: system.to_string(),
                column: field.name.clone(),
                inferred,
            };
            warning.log();
            self.warnings.push(warning);
        }
    }
}
