//! Position scales, color handling and axis ticks.

use super::{ChartError, ChartResult};

/// Categorical palette applied in domain order.
pub const PALETTE: [&str; 10] = [
    "#4c78a8", "#f58518", "#e45756", "#72b7b2", "#54a24b", "#eeca3b", "#b279a2", "#ff9da6",
    "#9d755d", "#bab0ac",
];

/// Ends of the sequential ramp for quantitative color.
const RAMP_LOW: Rgb = Rgb(0xde, 0xeb, 0xf7);
const RAMP_HIGH: Rgb = Rgb(0x08, 0x51, 0x9c);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rgb`, `#rrggbb` or a handful of CSS color names.
    ///
    /// # Errors
    ///
    /// Returns [`ChartError::Compile`] for anything else.
    pub fn parse(text: &str) -> ChartResult<Self> {
        let text = text.trim();
        let named = match text.to_ascii_lowercase().as_str() {
            "white" => Some(Rgb(255, 255, 255)),
            "black" => Some(Rgb(0, 0, 0)),
            "red" => Some(Rgb(255, 0, 0)),
            "green" => Some(Rgb(0, 128, 0)),
            "blue" => Some(Rgb(0, 0, 255)),
            "gray" | "grey" => Some(Rgb(128, 128, 128)),
            "orange" => Some(Rgb(255, 165, 0)),
            "steelblue" => Some(Rgb(70, 130, 180)),
            "transparent" => Some(Rgb(255, 255, 255)),
            _ => None,
        };
        if let Some(rgb) = named {
            return Ok(rgb);
        }

        let hex = text
            .strip_prefix('#')
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| ChartError::Compile(format!("unsupported color: {text}")))?;
        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|e| ChartError::Compile(e.to_string()));

        match hex.len() {
            6 => Ok(Rgb(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
            3 => {
                let short = |i: usize| channel(&hex[i..=i]).map(|v| v * 17);
                Ok(Rgb(short(0)?, short(1)?, short(2)?))
            }
            _ => Err(ChartError::Compile(format!("unsupported color: {text}"))),
        }
    }

    /// Linear blend, `t` clamped to `0..=1`.
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

/// Color at `index` of [`PALETTE`], cycling.
pub fn palette_color(index: usize) -> Rgb {
    // Palette entries are literal hex colors.
    Rgb::parse(PALETTE[index % PALETTE.len()]).unwrap_or(Rgb(0x4c, 0x78, 0xa8))
}

/// Sequential ramp position for a quantitative color value.
pub fn ramp_color(t: f64) -> Rgb {
    RAMP_LOW.lerp(RAMP_HIGH, t)
}

// ============================================================================
// Continuous
// ============================================================================

/// Maps a numeric domain onto a pixel range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    pub domain: (f64, f64),
    pub range: (f64, f64),
}

impl LinearScale {
    /// A scale over `values`, optionally forced to include zero and
    /// extended to round tick boundaries.
    ///
    /// An empty or single-valued domain is widened so the mapping stays
    /// finite.
    pub fn fit(values: &[f64], include_zero: bool, nice: bool, range: (f64, f64)) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (mut low, mut high) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if low > high {
            (low, high) = (0.0, 1.0);
        }
        if include_zero {
            low = low.min(0.0);
            high = high.max(0.0);
        }
        if low == high {
            let pad = if low == 0.0 { 1.0 } else { low.abs() * 0.5 };
            low -= pad;
            high += pad;
        }
        if nice {
            if let Some(step) = nice_step(low, high, TICK_COUNT) {
                low = (low / step).floor() * step;
                high = (high / step).ceil() * step;
            }
        }
        Self {
            domain: (low, high),
            range,
        }
    }

    pub fn map(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        if d1 == d0 {
            return (r0 + r1) / 2.0;
        }
        r0 + (value - d0) / (d1 - d0) * (r1 - r0)
    }

    /// Position of zero, or of the domain end nearest to it.
    pub fn baseline(&self) -> f64 {
        let (d0, d1) = self.domain;
        self.map(0.0_f64.clamp(d0.min(d1), d0.max(d1)))
    }

    /// Fraction of the domain covered up to `value`.
    pub fn normalize(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        if d1 == d0 {
            0.5
        } else {
            (value - d0) / (d1 - d0)
        }
    }

    pub fn ticks(&self) -> Vec<f64> {
        let (low, high) = self.domain;
        let Some(step) = nice_step(low, high, TICK_COUNT) else {
            return Vec::new();
        };
        let first = (low / step).ceil();
        let last = (high / step).floor();
        let count = (last - first).max(0.0) as usize;
        (0..=count)
            .map(|i| (first + i as f64) * step)
            .filter(|t| *t >= low - step * 1e-9 && *t <= high + step * 1e-9)
            .collect()
    }
}

const TICK_COUNT: usize = 5;

/// Round step of 1, 2, 5 or 10 times a power of ten giving about `count`
/// intervals over `low..high`.
fn nice_step(low: f64, high: f64, count: usize) -> Option<f64> {
    let span = high - low;
    if !(span.is_finite() && span > 0.0) || count == 0 {
        return None;
    }
    let rough = span / count as f64;
    let magnitude = 10f64.powf(rough.log10().floor());
    let residual = rough / magnitude;
    let factor = if residual <= 1.0 {
        1.0
    } else if residual <= 2.0 {
        2.0
    } else if residual <= 5.0 {
        5.0
    } else {
        10.0
    };
    Some(factor * magnitude)
}

// ============================================================================
// Discrete
// ============================================================================

/// Equal bands, one per category, with inner and outer padding.
#[derive(Debug, Clone, PartialEq)]
pub struct BandScale {
    pub domain: Vec<String>,
    pub range: (f64, f64),
    padding_inner: f64,
    padding_outer: f64,
}

impl BandScale {
    pub fn new(domain: Vec<String>, range: (f64, f64)) -> Self {
        Self {
            domain,
            range,
            padding_inner: 0.1,
            padding_outer: 0.05,
        }
    }

    fn step(&self) -> f64 {
        let n = self.domain.len() as f64;
        let span = self.range.1 - self.range.0;
        span / (n - self.padding_inner + 2.0 * self.padding_outer).max(1.0)
    }

    pub fn bandwidth(&self) -> f64 {
        self.step() * (1.0 - self.padding_inner)
    }

    /// Start of the band for `category`.
    pub fn start(&self, category: &str) -> Option<f64> {
        let index = self.domain.iter().position(|c| c == category)?;
        let step = self.step();
        Some(self.range.0 + step * (self.padding_outer + index as f64))
    }

    pub fn center(&self, category: &str) -> Option<f64> {
        self.start(category).map(|s| s + self.bandwidth() / 2.0)
    }
}

/// Evenly spaced points, one per category.
#[derive(Debug, Clone, PartialEq)]
pub struct PointScale {
    pub domain: Vec<String>,
    pub range: (f64, f64),
}

impl PointScale {
    pub fn new(domain: Vec<String>, range: (f64, f64)) -> Self {
        Self { domain, range }
    }

    pub fn position(&self, category: &str) -> Option<f64> {
        let index = self.domain.iter().position(|c| c == category)?;
        // Half a step of padding on each side.
        let step = (self.range.1 - self.range.0) / self.domain.len() as f64;
        Some(self.range.0 + step * (index as f64 + 0.5))
    }

    pub fn step(&self) -> f64 {
        (self.range.1 - self.range.0).abs() / self.domain.len().max(1) as f64
    }
}

/// A resolved position scale.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionScale {
    Linear(LinearScale),
    Band(BandScale),
    Point(PointScale),
}

impl PositionScale {
    pub fn is_continuous(&self) -> bool {
        matches!(self, PositionScale::Linear(_))
    }

    /// Width of one category slot in pixels; zero for continuous scales.
    pub fn slot(&self) -> f64 {
        match self {
            PositionScale::Linear(_) => 0.0,
            PositionScale::Band(band) => band.bandwidth().abs(),
            PositionScale::Point(point) => point.step(),
        }
    }
}
