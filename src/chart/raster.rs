//! [`ChartPlan`] → PNG bytes.
//!
//! Drawing happens into an in-memory RGB buffer through plotters' bitmap
//! backend; the buffer is then PNG-encoded. No fonts or system state are
//! involved, so equal plans always give equal bytes.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::RGBAColor;

use super::compile::{ChartPlan, Paint, Primitive};
use super::scale::Rgb;
use super::{ChartError, ChartResult};

type Canvas<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// Rasterize `plan` and encode it as PNG.
///
/// # Errors
///
/// Returns [`ChartError::Render`] if drawing or encoding fails.
pub fn rasterize(plan: &ChartPlan) -> ChartResult<Vec<u8>> {
    let (width, height) = (plan.width, plan.height);
    let mut buffer = vec![0u8; width as usize * height as usize * 3];

    {
        let canvas = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        canvas.fill(&rgb(plan.background)).map_err(render_error)?;
        for primitive in &plan.primitives {
            draw(&canvas, primitive)?;
        }
        canvas.present().map_err(render_error)?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&buffer, width, height, ExtendedColorType::Rgb8)
        .map_err(render_error)?;
    Ok(png)
}

fn draw(canvas: &Canvas<'_>, primitive: &Primitive) -> ChartResult<()> {
    let drawn = match primitive {
        Primitive::Rect {
            top_left,
            bottom_right,
            paint,
        } => canvas.draw(&Rectangle::new([*top_left, *bottom_right], color(paint).filled())),
        Primitive::Path {
            points,
            paint,
            width,
        } => canvas.draw(&PathElement::new(points.clone(), stroke(paint, *width))),
        Primitive::Polygon { points, paint } => {
            canvas.draw(&Polygon::new(points.clone(), color(paint).filled()))
        }
        Primitive::Circle {
            center,
            radius,
            paint,
            filled,
        } => {
            let style = if *filled {
                color(paint).filled()
            } else {
                stroke(paint, 2)
            };
            canvas.draw(&Circle::new(*center, *radius, style))
        }
    };
    drawn.map_err(render_error)
}

fn rgb(value: Rgb) -> RGBColor {
    RGBColor(value.0, value.1, value.2)
}

fn color(paint: &Paint) -> RGBAColor {
    rgb(paint.rgb).mix(paint.opacity)
}

fn stroke(paint: &Paint, width: u32) -> ShapeStyle {
    ShapeStyle {
        color: color(paint),
        filled: false,
        stroke_width: width.max(1),
    }
}

fn render_error(err: impl std::fmt::Display) -> ChartError {
    ChartError::Render(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::spec::MarkType;

    fn plan(primitives: Vec<Primitive>) -> ChartPlan {
        ChartPlan {
            width: 20,
            height: 10,
            background: Rgb(255, 255, 255),
            title: None,
            mark: MarkType::Bar,
            primitives,
        }
    }

    #[test]
    fn test_png_signature_and_dimensions() {
        let png = rasterize(&plan(Vec::new())).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        // IHDR width and height, big-endian.
        assert_eq!(&png[16..20], &20u32.to_be_bytes());
        assert_eq!(&png[20..24], &10u32.to_be_bytes());
    }

    #[test]
    fn test_primitives_change_pixels() {
        let blank = rasterize(&plan(Vec::new())).unwrap();
        let paint = Paint {
            rgb: Rgb(0, 0, 0),
            opacity: 1.0,
        };
        let filled = rasterize(&plan(vec![Primitive::Rect {
            top_left: (2, 2),
            bottom_right: (8, 8),
            paint,
        }]))
        .unwrap();
        assert_ne!(blank, filled);
    }
}
