//! Chart pipeline from normalized results to PNG files.

use serde_json::{json, Value};
use tabula::chart::{prepare, ChartDescriptor, ChartError, ChartRenderer};
use tabula::tabular::{ColumnType, UniversalTabularResult};
use tokio_util::sync::CancellationToken;

fn sales() -> UniversalTabularResult {
    UniversalTabularResult::new(
        vec!["region".into(), "quarter".into(), "total".into()],
        vec![ColumnType::String, ColumnType::String, ColumnType::Float],
        vec![
            vec!["north".into(), "Q1".into(), "10.5".into()],
            vec!["north".into(), "Q2".into(), "12".into()],
            vec!["south".into(), "Q1".into(), "4".into()],
            vec!["south".into(), "Q2".into(), "".into()],
        ],
    )
    .unwrap()
}

fn specs() -> Vec<Value> {
    vec![
        json!({"mark": "bar", "encoding": {"x": {"field": "region"}, "y": {"field": "total", "aggregate": "sum"}}}),
        json!({"mark": "bar", "encoding": {
            "x": {"field": "quarter"}, "y": {"field": "total"}, "color": {"field": "region"}
        }}),
        json!({"mark": {"type": "line", "color": "#e45756", "strokeWidth": 3}, "encoding": {
            "x": {"field": "quarter", "type": "ordinal"}, "y": {"field": "total"}, "color": {"field": "region"}
        }}),
        json!({"mark": "area", "encoding": {"x": {"field": "quarter"}, "y": {"field": "total"}}}),
        json!({"mark": "point", "encoding": {"x": {"field": "region"}, "y": {"field": "total"}, "size": {"field": "total"}}}),
        json!({"mark": "circle", "width": 320, "height": 200, "encoding": {"x": {"field": "total"}, "y": {"field": "total"}}}),
        json!({"mark": "tick", "encoding": {"x": {"field": "region"}, "y": {"field": "total"}}}),
        json!({"mark": "rule", "encoding": {"y": {"field": "total", "aggregate": "mean"}}}),
    ]
}

fn png_dimensions(png: &[u8]) -> (u32, u32) {
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
    let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
    (width, height)
}

#[test]
fn test_every_mark_renders_deterministically() {
    let renderer = ChartRenderer::new(2, 480, 300);
    let records = prepare(&sales());

    for spec in specs() {
        let first = renderer.render_png(&spec, &records).unwrap();
        let second = renderer.render_png(&spec, &records).unwrap();
        assert_eq!(first, second, "non-deterministic output for {spec}");
    }
}

#[test]
fn test_spec_size_overrides_default() {
    let renderer = ChartRenderer::new(1, 480, 300);
    let records = prepare(&sales());

    let default_size = renderer.render_png(&specs()[0], &records).unwrap();
    assert_eq!(png_dimensions(&default_size), (480, 300));

    let sized = renderer.render_png(&specs()[5], &records).unwrap();
    assert_eq!(png_dimensions(&sized), (320, 200));
}

#[test]
fn test_different_data_gives_different_image() {
    let renderer = ChartRenderer::new(1, 200, 120);
    let spec = &specs()[0];

    let all = prepare(&sales());
    let fewer = &all[..2];
    assert_ne!(
        renderer.render_png(spec, &all).unwrap(),
        renderer.render_png(spec, fewer).unwrap()
    );
}

#[tokio::test]
async fn test_empty_result_renders_valid_png() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("empty.png");
    let empty = UniversalTabularResult::new(
        vec!["region".into(), "total".into()],
        vec![ColumnType::String, ColumnType::Float],
        Vec::new(),
    )
    .unwrap();

    let records = prepare(&empty);
    assert!(records.is_empty());

    let path = ChartRenderer::new(1, 300, 200)
        .render(&specs()[0], &records, &output, &CancellationToken::new())
        .await
        .unwrap();

    let png = std::fs::read(path).unwrap();
    assert_eq!(png_dimensions(&png), (300, 200));
}

#[tokio::test]
async fn test_rendered_file_matches_in_memory_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("charts/revenue.png");
    let renderer = ChartRenderer::new(1, 240, 160);
    let records = prepare(&sales());

    renderer
        .render(&specs()[1], &records, &output, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), renderer.render_png(&specs()[1], &records).unwrap());
}

#[tokio::test]
async fn test_malformed_specs_fail_to_compile() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = ChartRenderer::new(1, 100, 100);
    let records = prepare(&sales());

    let malformed = [
        json!("bar"),
        json!({"mark": "pie", "encoding": {"x": {"field": "region"}}}),
        json!({"mark": "bar", "encoding": {}}),
        json!({"mark": "bar", "encoding": {"x": {"field": "revenue"}}}),
        json!({"mark": "bar", "width": 0, "encoding": {"x": {"field": "region"}}}),
    ];

    for (index, spec) in malformed.iter().enumerate() {
        let output = dir.path().join(format!("bad_{index}.png"));
        let err = renderer
            .render(spec, &records, &output, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChartError::Compile(_)), "{spec} gave {err}");
        assert!(!output.exists());
    }
}

#[test]
fn test_descriptor_binds_records_into_spec() {
    let records = prepare(&sales());
    let descriptor = ChartDescriptor::new(Some("Revenue".into()), "revenue", &specs()[0], records.clone());

    assert_eq!(descriptor.spec["data"]["values"].as_array().unwrap().len(), 4);
    assert_eq!(descriptor.spec["data"]["values"][0]["region"], json!("north"));
    assert_eq!(descriptor.records, records);
    assert!(descriptor.path.is_none());
}
