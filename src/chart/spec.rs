//! The declarative chart grammar: a Vega-Lite subset.
//!
//! Only the members below are read; anything else in the document is
//! ignored. A `data` member is never read because the records bound at
//! render time replace it.
//!
//! ```json
//! {
//!   "mark": {"type": "bar", "color": "#4c78a8"},
//!   "encoding": {
//!     "x": {"field": "region", "type": "nominal"},
//!     "y": {"field": "total", "aggregate": "sum", "scale": {"zero": true}},
//!     "color": {"field": "channel"}
//!   },
//!   "width": 640,
//!   "height": 400
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChartError, ChartResult, ValueRecord};

/// Largest accepted width or height in pixels.
pub const MAX_DIMENSION: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkType {
    Bar,
    Line,
    Point,
    Circle,
    Square,
    Area,
    Tick,
    Rule,
}

impl MarkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkType::Bar => "bar",
            MarkType::Line => "line",
            MarkType::Point => "point",
            MarkType::Circle => "circle",
            MarkType::Square => "square",
            MarkType::Area => "area",
            MarkType::Tick => "tick",
            MarkType::Rule => "rule",
        }
    }
}

impl fmt::Display for MarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkType {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bar" => Ok(MarkType::Bar),
            "line" => Ok(MarkType::Line),
            "point" => Ok(MarkType::Point),
            "circle" => Ok(MarkType::Circle),
            "square" => Ok(MarkType::Square),
            "area" => Ok(MarkType::Area),
            "tick" => Ok(MarkType::Tick),
            "rule" => Ok(MarkType::Rule),
            other => Err(ChartError::Compile(format!("unsupported mark type: {other}"))),
        }
    }
}

/// A resolved mark with its optional style overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub kind: MarkType,
    pub color: Option<String>,
    pub opacity: Option<f64>,
    /// Symbol area in square pixels for point-like marks.
    pub size: Option<f64>,
    pub stroke_width: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Quantitative,
    Nominal,
    Ordinal,
    Temporal,
}

impl FieldType {
    /// Whether values are placed on a continuous scale.
    pub fn is_continuous(&self) -> bool {
        matches!(self, FieldType::Quantitative | FieldType::Temporal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    #[serde(alias = "average")]
    Mean,
    Count,
    Min,
    Max,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScaleDef {
    pub zero: Option<bool>,
    pub domain: Option<Vec<Value>>,
}

/// One encoding channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelDef {
    pub field: Option<String>,
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    pub aggregate: Option<Aggregate>,
    pub scale: ScaleDef,
}

impl ChannelDef {
    fn validate(&self, channel: &str) -> ChartResult<()> {
        if self.field.is_none() && self.aggregate != Some(Aggregate::Count) {
            return Err(ChartError::Compile(format!(
                "encoding.{channel} needs a field unless it counts records"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Encoding {
    pub x: Option<ChannelDef>,
    pub y: Option<ChannelDef>,
    pub color: Option<ChannelDef>,
    pub size: Option<ChannelDef>,
}

/// A parsed chart spec.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub mark: Mark,
    pub encoding: Encoding,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub background: Option<String>,
    /// Carried for the report; never drawn.
    pub title: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MarkDef {
    Name(String),
    Object {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        opacity: Option<f64>,
        #[serde(default)]
        size: Option<f64>,
        #[serde(default, rename = "strokeWidth")]
        stroke_width: Option<f64>,
    },
}

#[derive(Deserialize)]
struct SpecDocument {
    mark: Option<MarkDef>,
    #[serde(default)]
    encoding: Encoding,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    background: Option<String>,
    #[serde(default)]
    title: Option<Value>,
}

impl ChartSpec {
    /// Parse JSON text.
    pub fn from_json(text: &str) -> ChartResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ChartError::Compile(format!("chart spec is not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Parse an already decoded JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ChartError::Compile`] when the document is not an object,
    /// has no or an unknown mark, uses an unknown field type or aggregate,
    /// has neither an `x` nor a `y` channel, or declares dimensions outside
    /// `1..=4096`.
    pub fn from_value(value: &Value) -> ChartResult<Self> {
        if !value.is_object() {
            return Err(ChartError::Compile("chart spec must be a JSON object".into()));
        }
        let document = SpecDocument::deserialize(value)
            .map_err(|e| ChartError::Compile(format!("invalid chart spec: {e}")))?;

        let mark = match document.mark {
            None => return Err(ChartError::Compile("chart spec has no mark".into())),
            Some(MarkDef::Name(name)) => Mark {
                kind: name.parse()?,
                color: None,
                opacity: None,
                size: None,
                stroke_width: None,
            },
            Some(MarkDef::Object {
                kind,
                color,
                opacity,
                size,
                stroke_width,
            }) => Mark {
                kind: kind.parse()?,
                color,
                opacity,
                size,
                stroke_width,
            },
        };

        let encoding = document.encoding;
        if encoding.x.is_none() && encoding.y.is_none() {
            return Err(ChartError::Compile("encoding needs an x or y channel".into()));
        }
        for (name, channel) in [
            ("x", &encoding.x),
            ("y", &encoding.y),
            ("color", &encoding.color),
            ("size", &encoding.size),
        ] {
            if let Some(channel) = channel {
                channel.validate(name)?;
            }
        }

        for dimension in [document.width, document.height].into_iter().flatten() {
            if dimension == 0 || dimension > MAX_DIMENSION {
                return Err(ChartError::Compile(format!(
                    "chart dimension {dimension} outside 1..={MAX_DIMENSION}"
                )));
            }
        }

        let title = match document.title {
            Some(Value::String(text)) => Some(text),
            Some(Value::Object(object)) => object.get("text").and_then(Value::as_str).map(String::from),
            _ => None,
        };

        Ok(Self {
            mark,
            encoding,
            width: document.width,
            height: document.height,
            background: document.background,
            title,
        })
    }

    /// Fields referenced by any channel, in channel order.
    pub fn fields(&self) -> Vec<&str> {
        [
            &self.encoding.x,
            &self.encoding.y,
            &self.encoding.color,
            &self.encoding.size,
        ]
        .into_iter()
        .flatten()
        .filter_map(|channel| channel.field.as_deref())
        .collect()
    }
}

/// A copy of `spec` whose `data` member holds `records`.
pub fn bind_data(spec: &Value, records: &[ValueRecord]) -> Value {
    let mut bound = spec.clone();
    if let Value::Object(object) = &mut bound {
        object.insert("data".to_string(), json!({ "values": records }));
    }
    bound
}
