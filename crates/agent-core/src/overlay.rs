//! Renders the two screenshot-overlay strategies onto a PNG and returns a
//! coordinate map in logical space (spec.md §4.A).
//!
//! The grid overlay is the DPI-sensitive path: drawing happens in physical
//! (screenshot) pixel space, but every coordinate handed back to the caller
//! is converted to logical space, since that's the only space gestures
//! consume. Keeping the two spaces as distinct types removes an entire bug
//! class where a tap lands in the wrong place on a high-DPI device.

use std::collections::HashMap;
use std::io::Cursor;

use ab_glyph::{FontRef, PxScale};
use base64::{engine::general_purpose, Engine};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::errors::OverlayError;
use crate::types::{Logical, Physical, UiElement, WindowSize};

const TAG_CIRCLE_RADIUS: i32 = 20;
const TAG_FILL: Rgba<u8> = Rgba([220, 40, 40, 235]);
const TAG_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID_LINE: Rgba<u8> = Rgba([0, 200, 255, 200]);
const GRID_LABEL: Rgba<u8> = Rgba([0, 200, 255, 255]);

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

fn font() -> FontRef<'static> {
    FontRef::try_from_slice(FONT_BYTES).expect("bundled font must parse")
}

/// Decode a base64 PNG into an RGBA image buffer plus its intrinsic
/// physical dimensions.
fn decode_png(base64_png: &str) -> Result<RgbaImage, OverlayError> {
    let bytes = general_purpose::STANDARD
        .decode(base64_png)
        .map_err(|_| OverlayError::InvalidImageDimensions)?;
    let img = image::load_from_memory(&bytes)?;
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(OverlayError::InvalidImageDimensions);
    }
    Ok(img.into_rgba8())
}

fn encode_png(img: &RgbaImage) -> Result<String, OverlayError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Numeric tag overlay (spec.md §4.A). `elements` must already be filtered
/// to whatever eligibility the caller wants reflected in the tag mapping;
/// this function additionally re-checks `is_tag_eligible` defensively.
///
/// Tags are 1-indexed in traversal order. The circle is drawn at the
/// logical-space midpoint of `bounds`, scaled into the screenshot's
/// physical pixel space by the same scale factors the grid overlay uses.
pub fn numeric_tag_overlay(
    base64_png: &str,
    logical_size: WindowSize,
    elements: &[UiElement],
) -> Result<(String, HashMap<u32, UiElement>), OverlayError> {
    let mut img = decode_png(base64_png)?;
    let (physical_w, physical_h) = (img.width(), img.height());
    let scale_x = physical_w as f64 / logical_size.width as f64;
    let scale_y = physical_h as f64 / logical_size.height as f64;

    let font = font();
    let mut mapping = HashMap::new();
    let mut tag_id: u32 = 0;

    for element in elements {
        if !element.is_tag_eligible() {
            continue;
        }
        let bounds = element.bounds.expect("is_tag_eligible implies bounds");
        tag_id += 1;

        let logical_center = bounds.center();
        let physical_center = to_physical(logical_center, scale_x, scale_y);
        let (cx, cy) = (physical_center.x.round() as i32, physical_center.y.round() as i32);

        draw_filled_circle_mut(&mut img, (cx, cy), TAG_CIRCLE_RADIUS, TAG_FILL);

        let label = tag_id.to_string();
        let scale = PxScale::from(22.0);
        let (tw, th) = text_size(scale, &font, &label);
        draw_text_mut(
            &mut img,
            TAG_TEXT,
            cx - tw as i32 / 2,
            cy - th as i32 / 2,
            scale,
            &font,
            &label,
        );

        mapping.insert(tag_id, element.clone());
    }

    Ok((encode_png(&img)?, mapping))
}

/// Grid overlay (spec.md §4.A), `grid_size` x `grid_size`, default 10,
/// configurable 5..20.
pub fn grid_overlay(
    base64_png: &str,
    logical_size: WindowSize,
    grid_size: u32,
) -> Result<(String, HashMap<String, Logical>), OverlayError> {
    let mut img = decode_png(base64_png)?;
    let (physical_w, physical_h) = (img.width(), img.height());
    let scale_x = physical_w as f64 / logical_size.width as f64;
    let scale_y = physical_h as f64 / logical_size.height as f64;

    let cell_w = physical_w as f64 / grid_size as f64;
    let cell_h = physical_h as f64 / grid_size as f64;

    let line_stroke = ((scale_x.max(scale_y)) as u32).max(2);
    let font_size = (14.0 * scale_x.max(scale_y) as f32).max(14.0);
    let font = font();

    let mut map = HashMap::new();

    for row in 0..grid_size {
        for col in 0..grid_size {
            let cell_x0 = (col as f64 * cell_w).round() as i32;
            let cell_y0 = (row as f64 * cell_h).round() as i32;
            let w = cell_w.round().max(1.0) as u32;
            let h = cell_h.round().max(1.0) as u32;

            for t in 0..line_stroke as i32 {
                if (2 * t) as u32 >= w.min(h) {
                    break;
                }
                let rect = Rect::at(cell_x0 + t, cell_y0 + t)
                    .of_size(w.saturating_sub(2 * t as u32), h.saturating_sub(2 * t as u32));
                draw_hollow_rect_mut(&mut img, rect, GRID_LINE);
            }

            let label = format!("{}{}", column_label(col), row + 1);
            draw_text_mut(
                &mut img,
                GRID_LABEL,
                cell_x0 + 2,
                cell_y0 + 2,
                PxScale::from(font_size),
                &font,
                &label,
            );

            // Coordinate map invariant: physical center -> logical via the
            // per-axis scale (spec.md §4.A step 5).
            let physical_center = Physical::new(cell_x0 as f64 + cell_w / 2.0, cell_y0 as f64 + cell_h / 2.0);
            let logical = to_logical(physical_center, scale_x, scale_y);
            map.insert(label, logical);
        }
    }

    Ok((encode_png(&img)?, map))
}

/// `A..Z, AA..` style column label, left-to-right. The spec's documented
/// range only needs `A..J` for a default 10-wide grid, but `grid_size` is
/// configurable up to 20, so this must extend past `Z`.
fn column_label(mut col: u32) -> String {
    let mut chars = Vec::new();
    loop {
        chars.push((b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    chars.iter().rev().collect()
}

fn to_physical(p: Logical, scale_x: f64, scale_y: f64) -> Physical {
    Physical::new(p.x * scale_x, p.y * scale_y)
}

fn to_logical(p: Physical, scale_x: f64, scale_y: f64) -> Logical {
    Logical::new(p.x / scale_x, p.y / scale_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba as Rgba8};

    fn blank_png(w: u32, h: u32) -> String {
        let img: RgbaImage = ImageBuffer::from_pixel(w, h, Rgba8([255, 255, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn column_labels_extend_past_z() {
        assert_eq!(column_label(0), "A");
        assert_eq!(column_label(9), "J");
        assert_eq!(column_label(25), "Z");
        assert_eq!(column_label(26), "AA");
    }

    #[test]
    fn grid_produces_n_squared_entries_with_expected_labels() {
        let png = blank_png(1284, 2778);
        let (_, map) = grid_overlay(&png, WindowSize { width: 390, height: 844 }, 10).unwrap();
        assert_eq!(map.len(), 100);
        assert!(map.contains_key("A1"));
        assert!(map.contains_key("J10"));
    }

    #[test]
    fn grid_coordinates_stay_inside_logical_bounds() {
        let png = blank_png(1284, 2778);
        let logical = WindowSize { width: 390, height: 844 };
        let (_, map) = grid_overlay(&png, logical, 10).unwrap();
        for (_, p) in map.iter() {
            assert!(p.x >= 0.0 && p.x < logical.width as f64);
            assert!(p.y >= 0.0 && p.y < logical.height as f64);
        }
    }

    #[test]
    fn grid_scale_differs_per_axis_and_e5_matches_scenario_s3() {
        // Scenario S3: 390x844 logical, 1284x2778 physical screenshot.
        let png = blank_png(1284, 2778);
        let (_, map) = grid_overlay(&png, WindowSize { width: 390, height: 844 }, 10).unwrap();
        let e5 = map.get("E5").unwrap();
        assert!((e5.x - 175.0).abs() <= 1.0);
        assert!((e5.y - 379.0).abs() <= 1.0);
    }

    #[test]
    fn zero_dimension_image_is_unrecoverable() {
        let bytes: Vec<u8> = vec![];
        let encoded = general_purpose::STANDARD.encode(bytes);
        let err = grid_overlay(&encoded, WindowSize { width: 100, height: 100 }, 10).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidImageDimensions));
    }

    #[test]
    fn numeric_tag_overlay_skips_ineligible_elements() {
        use crate::types::{Bounds, ElementType, UiElement};
        let png = blank_png(400, 800);
        let eligible = UiElement {
            element_id: "1".into(),
            text: "Login".into(),
            resource_id: None,
            class_name: None,
            content_desc: None,
            bounds: Some(Bounds { x1: 10.0, y1: 10.0, x2: 50.0, y2: 30.0 }),
            element_type: ElementType::Button,
            clickable: true,
            scrollable: false,
            focusable: true,
            long_clickable: false,
            checked: false,
            enabled: true,
            visible: true,
        };
        let mut not_visible = eligible.clone();
        not_visible.element_id = "2".into();
        not_visible.visible = false;

        let (_, mapping) = numeric_tag_overlay(
            &png,
            WindowSize { width: 200, height: 400 },
            &[eligible, not_visible],
        )
        .unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get(&1).unwrap().element_id, "1");
    }
}
