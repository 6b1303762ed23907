//! Spec + records → [`ChartPlan`].
//!
//! Compilation resolves every channel against the bound records, aggregates,
//! fits scales and lays the marks out as pixel primitives. Everything that
//! can be wrong with a spec fails here, before any pixel is drawn.
//!
//! ```text
//!   ChartSpec ─┐
//!              ├─► channels ─► datums (aggregated) ─► scales ─► primitives
//!   records  ──┘   (types)                                      + axes/grid
//! ```

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use super::scale::{
    palette_color, ramp_color, BandScale, LinearScale, PointScale, PositionScale, Rgb,
};
use super::spec::{Aggregate, ChannelDef, ChartSpec, FieldType, MarkType};
use super::{ChartError, ChartResult, ValueRecord};

const MARGIN_LEFT: f64 = 40.0;
const MARGIN_RIGHT: f64 = 16.0;
const MARGIN_TOP: f64 = 16.0;
const MARGIN_BOTTOM: f64 = 32.0;
const TICK_LENGTH: i32 = 5;

const AXIS_COLOR: Rgb = Rgb(0x88, 0x88, 0x88);
const GRID_COLOR: Rgb = Rgb(0xdd, 0xdd, 0xdd);
const DEFAULT_MARK_COLOR: &str = "#4c78a8";
const DEFAULT_POINT_AREA: f64 = 30.0;

/// A color with opacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub rgb: Rgb,
    pub opacity: f64,
}

/// A positioned drawing instruction in pixel space.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Rect {
        top_left: (i32, i32),
        bottom_right: (i32, i32),
        paint: Paint,
    },
    Path {
        points: Vec<(i32, i32)>,
        paint: Paint,
        width: u32,
    },
    Polygon {
        points: Vec<(i32, i32)>,
        paint: Paint,
    },
    Circle {
        center: (i32, i32),
        radius: u32,
        paint: Paint,
        filled: bool,
    },
}

/// A fully resolved chart, ready to rasterize.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPlan {
    pub width: u32,
    pub height: u32,
    pub background: Rgb,
    pub title: Option<String>,
    pub mark: MarkType,
    /// Drawn in order: grid, marks, axes.
    pub primitives: Vec<Primitive>,
}

/// Compile `spec` against `records`.
///
/// `default_size` supplies width and height when the spec has none.
///
/// # Errors
///
/// Returns [`ChartError::Compile`] when the spec is malformed, names a
/// field absent from the records, or uses a color that cannot be parsed.
pub fn compile(
    spec: &Value,
    records: &[ValueRecord],
    default_size: (u32, u32),
) -> ChartResult<ChartPlan> {
    let spec = ChartSpec::from_value(spec)?;
    let width = spec.width.unwrap_or(default_size.0);
    let height = spec.height.unwrap_or(default_size.1);
    if width == 0 || height == 0 {
        return Err(ChartError::Compile("chart has no area".into()));
    }

    check_fields(&spec, records)?;

    let background = match &spec.background {
        Some(color) => Rgb::parse(color)?,
        None => Rgb(255, 255, 255),
    };
    let base_color = Rgb::parse(spec.mark.color.as_deref().unwrap_or(DEFAULT_MARK_COLOR))?;

    let frame = Frame::new(width, height);
    let channels = Channels::resolve(&spec, records);
    let datums = channels.datums(records);

    let x_scale = channels.x.position_scale(&datums, Axis::X, spec.mark.kind, frame);
    let y_scale = channels.y.position_scale(&datums, Axis::Y, spec.mark.kind, frame);
    let colors = ColorMap::build(&channels.color, &datums, base_color);
    let sizes = channels.size.numeric_domain(&datums, |d| d.size);

    let layout = Layout {
        spec: &spec,
        frame,
        x: &x_scale,
        y: &y_scale,
        colors: &colors,
        sizes,
    };

    let mut primitives = layout.grid();
    primitives.extend(layout.marks(&datums));
    primitives.extend(layout.axes());

    let plan = ChartPlan {
        width,
        height,
        background,
        title: spec.title.clone(),
        mark: spec.mark.kind,
        primitives,
    };
    debug!(
        mark = %plan.mark,
        datums = datums.len(),
        primitives = plan.primitives.len(),
        "compiled chart plan"
    );
    Ok(plan)
}

fn check_fields(spec: &ChartSpec, records: &[ValueRecord]) -> ChartResult<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    for field in spec.fields() {
        if !first.contains_key(field) {
            return Err(ChartError::Compile(format!("unknown field: {field}")));
        }
    }
    Ok(())
}

// ============================================================================
// Channels and datums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Plot area inside the margins.
#[derive(Debug, Clone, Copy)]
struct Frame {
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Frame {
    fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        // Small canvases keep at least a one pixel plot area.
        let left = MARGIN_LEFT.min(w / 4.0);
        let right = (w - MARGIN_RIGHT.min(w / 8.0)).max(left + 1.0);
        let top = MARGIN_TOP.min(h / 8.0);
        let bottom = (h - MARGIN_BOTTOM.min(h / 4.0)).max(top + 1.0);
        Self {
            left,
            right,
            top,
            bottom,
        }
    }
}

/// A channel value after parsing.
#[derive(Debug, Clone, PartialEq)]
enum Datum {
    Number(f64),
    Category(String),
}

impl Datum {
    fn number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            Datum::Category(_) => None,
        }
    }

    fn key(&self) -> String {
        match self {
            Datum::Number(n) => n.to_string(),
            Datum::Category(c) => c.clone(),
        }
    }
}

/// One mark instance: a value per used channel.
#[derive(Debug, Clone, Default)]
struct Point {
    x: Option<Datum>,
    y: Option<Datum>,
    color: Option<Datum>,
    size: Option<f64>,
}

#[derive(Debug, Clone)]
struct Channel {
    field: Option<String>,
    field_type: FieldType,
    aggregate: Option<Aggregate>,
    zero: Option<bool>,
    domain: Option<Vec<Value>>,
    used: bool,
}

impl Channel {
    fn unused() -> Self {
        Self {
            field: None,
            field_type: FieldType::Nominal,
            aggregate: None,
            zero: None,
            domain: None,
            used: false,
        }
    }

    fn resolve(def: Option<&ChannelDef>, records: &[ValueRecord]) -> Self {
        let Some(def) = def else {
            return Self::unused();
        };
        let field_type = match (def.field_type, def.aggregate, def.field.as_deref()) {
            (Some(explicit), _, _) => explicit,
            (None, Some(Aggregate::Count), _) => FieldType::Quantitative,
            (None, _, Some(field)) => infer_type(field, records),
            (None, _, None) => FieldType::Nominal,
        };
        Self {
            field: def.field.clone(),
            field_type,
            aggregate: def.aggregate,
            zero: def.scale.zero,
            domain: def.scale.domain.clone(),
            used: true,
        }
    }

    /// Parse this channel's value out of a record; `None` drops the record.
    fn read(&self, record: &ValueRecord) -> Option<Datum> {
        let text = match self.field.as_deref() {
            Some(field) => record.get(field).map(value_text).unwrap_or_default(),
            None => String::new(),
        };
        match self.field_type {
            FieldType::Quantitative => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()).map(Datum::Number),
            FieldType::Temporal => parse_temporal(&text).map(Datum::Number),
            FieldType::Nominal | FieldType::Ordinal => Some(Datum::Category(text)),
        }
    }

    fn is_grouping(&self) -> bool {
        self.used && self.aggregate.is_none()
    }

    fn position_scale(
        &self,
        points: &[Point],
        axis: Axis,
        mark: MarkType,
        frame: Frame,
    ) -> PositionScale {
        let range = match axis {
            Axis::X => (frame.left, frame.right),
            Axis::Y => (frame.bottom, frame.top),
        };
        let pick = |p: &Point| match axis {
            Axis::X => p.x.clone(),
            Axis::Y => p.y.clone(),
        };

        if self.used && self.field_type.is_continuous() {
            let values: Vec<f64> = match self.explicit_numeric_domain() {
                Some(domain) => domain,
                None => points.iter().filter_map(|p| pick(p)?.number()).collect(),
            };
            let quantitative = self.field_type == FieldType::Quantitative;
            let default_zero = quantitative && self.domain.is_none();
            let include_zero = self.zero.unwrap_or(default_zero) && quantitative;
            let nice = self.domain.is_none();
            return PositionScale::Linear(LinearScale::fit(&values, include_zero, nice, range));
        }

        let categories = self.categories(points.iter().filter_map(|p| pick(p)));
        // Discrete y runs top to bottom.
        let range = match axis {
            Axis::X => range,
            Axis::Y => (frame.top, frame.bottom),
        };
        match mark {
            MarkType::Bar => PositionScale::Band(BandScale::new(categories, range)),
            _ => PositionScale::Point(PointScale::new(categories, range)),
        }
    }

    fn explicit_numeric_domain(&self) -> Option<Vec<f64>> {
        let domain = self.domain.as_ref()?;
        let values: Vec<f64> = domain
            .iter()
            .filter_map(|v| match self.field_type {
                FieldType::Temporal => parse_temporal(&value_text(v)),
                _ => value_text(v).trim().parse().ok(),
            })
            .collect();
        (!values.is_empty()).then_some(values)
    }

    /// Domain of a discrete channel: the explicit domain, else sorted
    /// distinct values (ordinal and nominal alike).
    fn categories(&self, data: impl Iterator<Item = Datum>) -> Vec<String> {
        if let Some(domain) = &self.domain {
            return domain.iter().map(value_text).collect();
        }
        let mut seen: Vec<String> = data.map(|d| d.key()).collect();
        seen.sort();
        seen.dedup();
        seen
    }

    fn numeric_domain(&self, points: &[Point], pick: impl Fn(&Point) -> Option<f64>) -> Option<(f64, f64)> {
        if !self.used {
            return None;
        }
        points
            .iter()
            .filter_map(pick)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
            })
    }
}

struct Channels {
    x: Channel,
    y: Channel,
    color: Channel,
    size: Channel,
}

impl Channels {
    fn resolve(spec: &ChartSpec, records: &[ValueRecord]) -> Self {
        let encoding = &spec.encoding;
        let mut size = Channel::resolve(encoding.size.as_ref(), records);
        if size.used && !size.field_type.is_continuous() {
            // Size only reads numbers.
            size.field_type = FieldType::Quantitative;
        }
        Self {
            x: Channel::resolve(encoding.x.as_ref(), records),
            y: Channel::resolve(encoding.y.as_ref(), records),
            color: Channel::resolve(encoding.color.as_ref(), records),
            size,
        }
    }

    fn all(&self) -> [&Channel; 4] {
        [&self.x, &self.y, &self.color, &self.size]
    }

    /// One point per record, or per group when any channel aggregates.
    fn datums(&self, records: &[ValueRecord]) -> Vec<Point> {
        let aggregating = self.all().iter().any(|c| c.used && c.aggregate.is_some());
        if !aggregating {
            return records.iter().filter_map(|r| self.point(r)).collect();
        }

        // Group by the non-aggregated channels, keeping first-seen order.
        let mut groups: Vec<(Vec<Option<Datum>>, Vec<&ValueRecord>)> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        'records: for record in records {
            let mut key = Vec::with_capacity(4);
            let mut values = Vec::with_capacity(4);
            for channel in self.all() {
                if channel.is_grouping() {
                    let Some(datum) = channel.read(record) else {
                        continue 'records;
                    };
                    key.push(datum.key());
                    values.push(Some(datum));
                } else {
                    values.push(None);
                }
            }
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(record),
                None => {
                    index.insert(key, groups.len());
                    groups.push((values, vec![record]));
                }
            }
        }

        groups
            .into_iter()
            .map(|(values, members)| {
                let mut resolved: Vec<Option<Datum>> = Vec::with_capacity(4);
                for (channel, value) in self.all().into_iter().zip(values) {
                    resolved.push(match channel.aggregate {
                        Some(aggregate) if channel.used => {
                            aggregate_values(channel, aggregate, &members).map(Datum::Number)
                        }
                        _ => value,
                    });
                }
                let mut resolved = resolved.into_iter();
                let mut next = || resolved.next().flatten();
                Point {
                    x: next(),
                    y: next(),
                    color: next(),
                    size: next().and_then(|d| d.number()),
                }
            })
            .collect()
    }

    fn point(&self, record: &ValueRecord) -> Option<Point> {
        let read = |channel: &Channel| -> Option<Option<Datum>> {
            if channel.used {
                channel.read(record).map(Some)
            } else {
                Some(None)
            }
        };
        Some(Point {
            x: read(&self.x)?,
            y: read(&self.y)?,
            color: read(&self.color)?,
            size: read(&self.size)?.and_then(|d| d.number()),
        })
    }
}

fn aggregate_values(channel: &Channel, aggregate: Aggregate, members: &[&ValueRecord]) -> Option<f64> {
    if aggregate == Aggregate::Count {
        return Some(members.len() as f64);
    }
    let numbers: Vec<f64> = members
        .iter()
        .filter_map(|r| channel.read(r)?.number())
        .collect();
    if numbers.is_empty() {
        return None;
    }
    Some(match aggregate {
        Aggregate::Sum => numbers.iter().sum(),
        Aggregate::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
        Aggregate::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Count => members.len() as f64,
    })
}

/// Quantitative when every non-empty value parses as a number, temporal when
/// every one parses as a date, nominal otherwise.
fn infer_type(field: &str, records: &[ValueRecord]) -> FieldType {
    let texts: Vec<String> = records
        .iter()
        .filter_map(|r| r.get(field))
        .map(value_text)
        .filter(|t| !t.trim().is_empty())
        .collect();
    if texts.is_empty() {
        return FieldType::Nominal;
    }
    if texts.iter().all(|t| t.trim().parse::<f64>().is_ok()) {
        FieldType::Quantitative
    } else if texts.iter().all(|t| parse_temporal(t).is_some()) {
        FieldType::Temporal
    } else {
        FieldType::Nominal
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Milliseconds since the epoch for a date, timestamp or RFC 3339 text.
fn parse_temporal(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Some(zoned.timestamp_millis() as f64);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis() as f64);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis() as f64)
}

// ============================================================================
// Color
// ============================================================================

enum ColorMap {
    Fixed(Rgb),
    Categorical(Vec<String>),
    Sequential(LinearScale),
}

impl ColorMap {
    fn build(channel: &Channel, points: &[Point], base: Rgb) -> Self {
        if !channel.used {
            return ColorMap::Fixed(base);
        }
        if channel.field_type.is_continuous() {
            let values: Vec<f64> = points.iter().filter_map(|p| p.color.as_ref()?.number()).collect();
            return ColorMap::Sequential(LinearScale::fit(&values, false, false, (0.0, 1.0)));
        }
        ColorMap::Categorical(channel.categories(points.iter().filter_map(|p| p.color.clone())))
    }

    fn color(&self, datum: Option<&Datum>) -> Rgb {
        match (self, datum) {
            (ColorMap::Fixed(rgb), _) => *rgb,
            (ColorMap::Categorical(domain), Some(d)) => {
                let key = d.key();
                let index = domain.iter().position(|c| *c == key).unwrap_or(0);
                palette_color(index)
            }
            (ColorMap::Sequential(scale), Some(Datum::Number(n))) => ramp_color(scale.normalize(*n)),
            _ => palette_color(0),
        }
    }
}

// ============================================================================
// Layout
// ============================================================================

struct Layout<'a> {
    spec: &'a ChartSpec,
    frame: Frame,
    x: &'a PositionScale,
    y: &'a PositionScale,
    colors: &'a ColorMap,
    sizes: Option<(f64, f64)>,
}

fn px(value: f64) -> i32 {
    value.round() as i32
}

impl Layout<'_> {
    fn paint(&self, point: &Point, default_opacity: f64) -> Paint {
        Paint {
            rgb: self.colors.color(point.color.as_ref()),
            opacity: self.spec.mark.opacity.unwrap_or(default_opacity).clamp(0.0, 1.0),
        }
    }

    /// Center of a datum on one axis; missing channels sit mid-frame.
    fn position(&self, scale: &PositionScale, datum: Option<&Datum>, axis: Axis) -> Option<f64> {
        let Some(datum) = datum else {
            return Some(match axis {
                Axis::X => (self.frame.left + self.frame.right) / 2.0,
                Axis::Y => (self.frame.top + self.frame.bottom) / 2.0,
            });
        };
        match scale {
            PositionScale::Linear(linear) => datum.number().map(|n| linear.map(n)),
            PositionScale::Band(band) => band.center(&datum.key()),
            PositionScale::Point(point) => point.position(&datum.key()),
        }
    }

    fn radius(&self, point: &Point) -> u32 {
        let area = match (point.size, self.sizes) {
            (Some(v), Some((lo, hi))) if hi > lo => 10.0 + (v - lo) / (hi - lo) * 190.0,
            (Some(_), Some(_)) => 60.0,
            _ => self.spec.mark.size.unwrap_or(DEFAULT_POINT_AREA),
        };
        (area.max(1.0) / std::f64::consts::PI).sqrt().round().max(1.0) as u32
    }

    fn stroke(&self) -> u32 {
        self.spec.mark.stroke_width.unwrap_or(2.0).round().clamp(1.0, 32.0) as u32
    }

    fn grid(&self) -> Vec<Primitive> {
        let paint = Paint {
            rgb: GRID_COLOR,
            opacity: 1.0,
        };
        let mut lines = Vec::new();
        if let PositionScale::Linear(scale) = self.y {
            for tick in scale.ticks() {
                let y = px(scale.map(tick));
                lines.push(Primitive::Path {
                    points: vec![(px(self.frame.left), y), (px(self.frame.right), y)],
                    paint,
                    width: 1,
                });
            }
        }
        if let PositionScale::Linear(scale) = self.x {
            for tick in scale.ticks() {
                let x = px(scale.map(tick));
                lines.push(Primitive::Path {
                    points: vec![(x, px(self.frame.top)), (x, px(self.frame.bottom))],
                    paint,
                    width: 1,
                });
            }
        }
        lines
    }

    fn axes(&self) -> Vec<Primitive> {
        let paint = Paint {
            rgb: AXIS_COLOR,
            opacity: 1.0,
        };
        let (left, right) = (px(self.frame.left), px(self.frame.right));
        let (top, bottom) = (px(self.frame.top), px(self.frame.bottom));

        let mut axes = vec![
            Primitive::Path {
                points: vec![(left, bottom), (right, bottom)],
                paint,
                width: 1,
            },
            Primitive::Path {
                points: vec![(left, top), (left, bottom)],
                paint,
                width: 1,
            },
        ];

        for x in tick_positions(self.x) {
            let x = px(x);
            axes.push(Primitive::Path {
                points: vec![(x, bottom), (x, bottom + TICK_LENGTH)],
                paint,
                width: 1,
            });
        }
        for y in tick_positions(self.y) {
            let y = px(y);
            axes.push(Primitive::Path {
                points: vec![(left - TICK_LENGTH, y), (left, y)],
                paint,
                width: 1,
            });
        }
        axes
    }

    fn marks(&self, points: &[Point]) -> Vec<Primitive> {
        match self.spec.mark.kind {
            MarkType::Bar => self.bars(points),
            MarkType::Line => self.lines(points),
            MarkType::Area => self.areas(points),
            MarkType::Point | MarkType::Circle | MarkType::Square => self.symbols(points),
            MarkType::Tick => self.ticks(points),
            MarkType::Rule => self.rules(points),
        }
    }

    /// Bars grow from the baseline of the continuous axis and stack per
    /// category when a color channel splits them.
    fn bars(&self, points: &[Point]) -> Vec<Primitive> {
        let stacked = !matches!(self.colors, ColorMap::Fixed(_));
        let mut stacks: HashMap<String, (f64, f64)> = HashMap::new();

        points
            .iter()
            .filter_map(|point| {
                let paint = self.paint(point, 1.0);
                match (self.x, self.y) {
                    (_, PositionScale::Linear(y)) => {
                        let value = point.y.as_ref()?.number()?;
                        let center = self.position(self.x, point.x.as_ref(), Axis::X)?;
                        let half = (self.band_width(self.x) / 2.0).max(1.0);
                        let (from, to) = stack_extent(&mut stacks, stacked, point.x.as_ref(), value);
                        Some(rect(center - half, y.map(to), center + half, y.map(from), paint))
                    }
                    (PositionScale::Linear(x), _) => {
                        let value = point.x.as_ref()?.number()?;
                        let center = self.position(self.y, point.y.as_ref(), Axis::Y)?;
                        let half = (self.band_width(self.y) / 2.0).max(1.0);
                        let (from, to) = stack_extent(&mut stacks, stacked, point.y.as_ref(), value);
                        Some(rect(x.map(from), center - half, x.map(to), center + half, paint))
                    }
                    _ => {
                        // Both discrete: fill the cell.
                        let cx = self.position(self.x, point.x.as_ref(), Axis::X)?;
                        let cy = self.position(self.y, point.y.as_ref(), Axis::Y)?;
                        let (hw, hh) = (self.band_width(self.x) / 2.0, self.band_width(self.y) / 2.0);
                        Some(rect(cx - hw, cy - hh, cx + hw, cy + hh, paint))
                    }
                }
            })
            .collect()
    }

    /// Pixel width of a bar along a discrete axis, or a thin default along a
    /// continuous one.
    fn band_width(&self, scale: &PositionScale) -> f64 {
        match scale {
            PositionScale::Linear(_) => 5.0,
            PositionScale::Point(_) if self.spec.mark.kind == MarkType::Bar => scale.slot() * 0.8,
            other => other.slot(),
        }
    }

    fn series<'p>(&self, points: &'p [Point]) -> Vec<Vec<&'p Point>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Point>> = HashMap::new();
        for point in points {
            let key = point.color.as_ref().map(Datum::key).unwrap_or_default();
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(point);
        }
        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect()
    }

    fn located(&self, series: &[&Point]) -> Vec<(f64, f64)> {
        let mut located: Vec<(f64, f64)> = series
            .iter()
            .filter_map(|p| {
                Some((
                    self.position(self.x, p.x.as_ref(), Axis::X)?,
                    self.position(self.y, p.y.as_ref(), Axis::Y)?,
                ))
            })
            .collect();
        // Lines run left to right.
        located.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        located
    }

    fn lines(&self, points: &[Point]) -> Vec<Primitive> {
        self.series(points)
            .into_iter()
            .filter_map(|series| {
                let paint = self.paint(series.first()?, 1.0);
                let located = self.located(&series);
                (!located.is_empty()).then(|| Primitive::Path {
                    points: located.into_iter().map(|(x, y)| (px(x), px(y))).collect(),
                    paint,
                    width: self.stroke(),
                })
            })
            .collect()
    }

    fn areas(&self, points: &[Point]) -> Vec<Primitive> {
        let baseline = match self.y {
            PositionScale::Linear(scale) => scale.baseline(),
            _ => self.frame.bottom,
        };
        self.series(points)
            .into_iter()
            .filter_map(|series| {
                let paint = self.paint(series.first()?, 0.7);
                let located = self.located(&series);
                let (first, last) = (located.first()?.0, located.last()?.0);
                let mut outline: Vec<(i32, i32)> =
                    located.iter().map(|(x, y)| (px(*x), px(*y))).collect();
                outline.push((px(last), px(baseline)));
                outline.push((px(first), px(baseline)));
                Some(Primitive::Polygon {
                    points: outline,
                    paint,
                })
            })
            .collect()
    }

    fn symbols(&self, points: &[Point]) -> Vec<Primitive> {
        let kind = self.spec.mark.kind;
        points
            .iter()
            .filter_map(|point| {
                let center = (
                    self.position(self.x, point.x.as_ref(), Axis::X)?,
                    self.position(self.y, point.y.as_ref(), Axis::Y)?,
                );
                let radius = self.radius(point);
                Some(match kind {
                    MarkType::Square => {
                        let r = radius as f64;
                        rect(center.0 - r, center.1 - r, center.0 + r, center.1 + r, self.paint(point, 0.7))
                    }
                    _ => Primitive::Circle {
                        center: (px(center.0), px(center.1)),
                        radius,
                        paint: self.paint(point, if kind == MarkType::Point { 1.0 } else { 0.7 }),
                        // Points are hollow, circles are filled.
                        filled: kind == MarkType::Circle,
                    },
                })
            })
            .collect()
    }

    fn ticks(&self, points: &[Point]) -> Vec<Primitive> {
        // Ticks run across the discrete axis, or vertically when both are
        // continuous.
        let vertical = self.x.is_continuous() || !self.y.is_continuous();
        points
            .iter()
            .filter_map(|point| {
                let x = self.position(self.x, point.x.as_ref(), Axis::X)?;
                let y = self.position(self.y, point.y.as_ref(), Axis::Y)?;
                let paint = self.paint(point, 1.0);
                let points = if vertical {
                    let half = tick_half(self.y);
                    vec![(px(x), px(y - half)), (px(x), px(y + half))]
                } else {
                    let half = tick_half(self.x);
                    vec![(px(x - half), px(y)), (px(x + half), px(y))]
                };
                Some(Primitive::Path {
                    points,
                    paint,
                    width: self.stroke(),
                })
            })
            .collect()
    }

    /// Rules span the frame for a single channel, or run from the baseline
    /// to the value when both channels are present.
    fn rules(&self, points: &[Point]) -> Vec<Primitive> {
        let x_used = self.spec.encoding.x.is_some();
        let y_used = self.spec.encoding.y.is_some();
        points
            .iter()
            .filter_map(|point| {
                let paint = self.paint(point, 1.0);
                let path = match (x_used, y_used) {
                    (true, false) => {
                        let x = px(self.position(self.x, point.x.as_ref(), Axis::X)?);
                        vec![(x, px(self.frame.top)), (x, px(self.frame.bottom))]
                    }
                    (false, true) => {
                        let y = px(self.position(self.y, point.y.as_ref(), Axis::Y)?);
                        vec![(px(self.frame.left), y), (px(self.frame.right), y)]
                    }
                    _ => {
                        let x = px(self.position(self.x, point.x.as_ref(), Axis::X)?);
                        let y = self.position(self.y, point.y.as_ref(), Axis::Y)?;
                        let base = match self.y {
                            PositionScale::Linear(scale) => scale.baseline(),
                            _ => self.frame.bottom,
                        };
                        vec![(x, px(base)), (x, px(y))]
                    }
                };
                Some(Primitive::Path {
                    points: path,
                    paint,
                    width: self.stroke(),
                })
            })
            .collect()
    }
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64, paint: Paint) -> Primitive {
    Primitive::Rect {
        top_left: (px(x0.min(x1)), px(y0.min(y1))),
        bottom_right: (px(x0.max(x1)), px(y0.max(y1))),
        paint,
    }
}

fn tick_half(scale: &PositionScale) -> f64 {
    match scale {
        PositionScale::Linear(_) => 7.0,
        other => (other.slot() * 0.375).max(2.0),
    }
}

fn tick_positions(scale: &PositionScale) -> Vec<f64> {
    match scale {
        PositionScale::Linear(linear) => linear.ticks().into_iter().map(|t| linear.map(t)).collect(),
        PositionScale::Band(band) => band.domain.iter().filter_map(|c| band.center(c)).collect(),
        PositionScale::Point(point) => point.domain.iter().filter_map(|c| point.position(c)).collect(),
    }
}

/// Extent of one bar segment: from the running stack top for its category
/// to that top plus `value`. Unstacked bars start at zero.
fn stack_extent(
    stacks: &mut HashMap<String, (f64, f64)>,
    stacked: bool,
    category: Option<&Datum>,
    value: f64,
) -> (f64, f64) {
    if !stacked {
        return (0.0, value);
    }
    let key = category.map(Datum::key).unwrap_or_default();
    // Positive and negative values stack away from zero separately.
    let (positive, negative) = stacks.entry(key).or_insert((0.0, 0.0));
    if value >= 0.0 {
        let from = *positive;
        *positive += value;
        (from, *positive)
    } else {
        let from = *negative;
        *negative += value;
        (from, *negative)
    }
}
