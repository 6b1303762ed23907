//! Normalizer properties over raw adapter output.

use serde_json::json;
use tabula::engine::{FieldDescriptor, NativeValue, RawEngineResult};
use tabula::tabular::{normalize, ColumnType, UniversalTabularResult, Warning, MISSING_VALUE_SENTINEL};

fn typed(name: &str, kind: ColumnType) -> FieldDescriptor {
    FieldDescriptor::typed(name, "TEST", kind)
}

#[test]
fn test_select_one_shape() {
    let raw = RawEngineResult::new(
        vec![typed("n", ColumnType::Float)],
        vec![vec![NativeValue::Int(1)]],
    );

    let out = normalize("orders", "SELECT 1 AS n", raw);
    assert!(out.warnings.is_empty());

    let value = serde_json::to_value(&out.result).unwrap();
    assert_eq!(value["columns"], json!(["n"]));
    assert_eq!(value["types"], json!(["FLOAT"]));
    assert_eq!(value["rows"], json!([{"n": "1"}]));
    assert_eq!(value["query"], json!("SELECT 1 AS n"));
}

#[test]
fn test_every_row_has_every_column() {
    let raw = RawEngineResult::new(
        vec![
            typed("id", ColumnType::Float),
            typed("name", ColumnType::String),
            typed("score", ColumnType::Float),
        ],
        vec![
            vec![NativeValue::Int(1), NativeValue::Text("a".into()), NativeValue::Float(0.5)],
            vec![NativeValue::Int(2)],
            vec![NativeValue::Int(3), NativeValue::Null, NativeValue::Decimal("12.50".into())],
        ],
    );

    let out = normalize("orders", "q", raw);
    let result = &out.result;

    assert_eq!(result.columns().len(), result.types().len());
    assert_eq!(result.row_count(), 3);
    for row in result.rows() {
        let keys: Vec<&str> = row.iter().map(|(column, _)| column).collect();
        assert_eq!(keys, ["id", "name", "score"]);
    }

    assert_eq!(result.row(1).unwrap().get("name"), Some(MISSING_VALUE_SENTINEL));
    assert_eq!(result.row(2).unwrap().get("score"), Some("12.50"));

    let coercions: Vec<(&str, usize)> = out
        .warnings
        .iter()
        .filter_map(|w| match w {
            Warning::Coercion { column, row, .. } => Some((column.as_str(), *row)),
            _ => None,
        })
        .collect();
    assert_eq!(coercions, [("name", 1), ("score", 1), ("name", 2)]);
}

#[test]
fn test_missing_schema_is_inferred_from_first_row() {
    let mut raw = RawEngineResult::new(
        vec![FieldDescriptor::untyped("total"), FieldDescriptor::untyped("region")],
        vec![
            vec![NativeValue::Float(10.5), NativeValue::Text("north".into())],
            vec![NativeValue::Text("n/a".into()), NativeValue::Int(7)],
        ],
    );
    raw.infer_missing_kinds("warehouse");

    let out = normalize("warehouse", "q", raw);
    assert_eq!(out.result.types(), [ColumnType::Float, ColumnType::String]);
    assert_eq!(out.result.row(1).unwrap().get("total"), Some("n/a"));

    let inferred = out
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::SchemaInference { .. }))
        .count();
    assert_eq!(inferred, 2);
}

#[test]
fn test_values_format_deterministically() {
    let raw = RawEngineResult::new(
        vec![
            typed("f", ColumnType::Float),
            typed("big", ColumnType::Float),
            typed("flag", ColumnType::String),
            typed("doc", ColumnType::String),
            typed("blob", ColumnType::String),
        ],
        vec![vec![
            NativeValue::Float(3.0),
            NativeValue::UInt(u64::MAX),
            NativeValue::Bool(true),
            NativeValue::Json(json!({"b": 1, "a": [true, null]})),
            NativeValue::Bytes(vec![0xde, 0xad]),
        ]],
    );

    let out = normalize("lite", "q", raw);
    let row = out.result.row(0).unwrap();
    assert_eq!(row.values(), ["3", "18446744073709551615", "true", r#"{"a":[true,null],"b":1}"#, "3q0="]);
}

#[test]
fn test_duplicate_column_names_are_suffixed() {
    let raw = RawEngineResult::new(
        vec![typed("n", ColumnType::Float), typed("n", ColumnType::Float)],
        vec![vec![NativeValue::Int(1), NativeValue::Int(2)]],
    );

    let out = normalize("orders", "SELECT 1 AS n, 2 AS n", raw);
    assert_eq!(out.result.columns(), ["n", "n_2"]);
    assert_eq!(out.result.row(0).unwrap().get("n_2"), Some("2"));
}

#[test]
fn test_saved_result_reads_back() {
    let saved = json!({
        "columns": ["region", "total"],
        "types": ["STRING", "FLOAT"],
        "rows": [{"region": "north", "total": "10.5"}]
    });

    let result: UniversalTabularResult = serde_json::from_value(saved).unwrap();
    assert_eq!(result.column_type("total"), Some(ColumnType::Float));
    assert_eq!(result.row(0).unwrap().get("region"), Some("north"));

    let malformed = json!({"columns": ["a"], "types": [], "rows": []});
    assert!(serde_json::from_value::<UniversalTabularResult>(malformed).is_err());
}
