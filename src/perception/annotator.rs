//! Set-of-Marks overlay: marks the targets of a round's predicted actions on
//! the screenshot the model saw. Purely observational; the loop never reads it.
use crate::action::types::{ParsedAction, ScreenPoint};
use crate::errors::PilotResult;

const MARK_COLOUR: [u8; 4] = [255, 40, 40, 230];
const END_COLOUR: [u8; 4] = [40, 160, 255, 230];

/// Returns PNG bytes of `src_bytes` with every action target marked and
/// numbered in execution order. Action points are in operator input space,
/// so they are scaled back by `scale_factor` onto the frame.
pub fn mark_actions(
    src_bytes: &[u8],
    actions: &[ParsedAction],
    scale_factor: f64,
) -> PilotResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)?;
    let mut canvas = img.to_rgba8();
    let (w, _) = canvas.dimensions();

    let radius: i32 = if w > 1600 { 24 } else { 14 };
    let thickness: i32 = if w > 1600 { 4 } else { 2 };
    let label_scale: u32 = if w > 1600 { 3 } else { 2 };

    for (idx, action) in actions.iter().enumerate() {
        let points = action.points();
        for (n, p) in points.iter().enumerate() {
            let (x, y) = to_frame(*p, scale_factor);
            let col = if n == 0 { MARK_COLOUR } else { END_COLOUR };
            draw_rect(&mut canvas, x - radius, y - radius, x + radius, y + radius, col, thickness);
            draw_cross(&mut canvas, x, y, radius / 2, col);
            if n == 0 {
                draw_number(&mut canvas, idx + 1, x + radius + 4, y - radius, col, label_scale);
            }
        }
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}

fn to_frame(p: ScreenPoint, scale_factor: f64) -> (i32, i32) {
    (
        (p.x as f64 * scale_factor).round() as i32,
        (p.y as f64 * scale_factor).round() as i32,
    )
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn put(canvas: &mut image::RgbaImage, x: i32, y: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        set_pixel(canvas, x as u32, y as u32, col);
    }
}

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    for t in 0..thickness {
        for x in x1..=x2 {
            put(canvas, x, y1 + t, col);
            put(canvas, x, y2 - t, col);
        }
        for y in y1..=y2 {
            put(canvas, x1 + t, y, col);
            put(canvas, x2 - t, y, col);
        }
    }
}

fn draw_cross(canvas: &mut image::RgbaImage, x: i32, y: i32, arm: i32, col: [u8; 4]) {
    for d in -arm..=arm {
        put(canvas, x + d, y, col);
        put(canvas, x, y + d, col);
    }
}

fn draw_number(canvas: &mut image::RgbaImage, n: usize, x: i32, y: i32, col: [u8; 4], scale: u32) {
    let step = (5 * scale + 1) as i32;
    for (i, c) in n.to_string().chars().enumerate() {
        let Some(digit) = c.to_digit(10) else { continue };
        let glyph = DIGITS[digit as usize];
        let gx = x + i as i32 * step;
        for (row, &bits) in glyph.iter().enumerate() {
            for bit in 0..5i32 {
                if (bits >> (4 - bit)) & 1 == 0 {
                    continue;
                }
                for sy in 0..scale as i32 {
                    for sx in 0..scale as i32 {
                        put(canvas, gx + bit * scale as i32 + sx, y + row as i32 * scale as i32 + sy, col);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap digits, bit4 = leftmost pixel.
const DIGITS: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110],
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111],
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110],
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010],
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110],
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110],
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100],
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110],
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110],
];

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_png(w: u32, h: u32) -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(image::RgbaImage::new(w, h))
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_marks_click_target() {
        let actions = vec![ParsedAction::Click { point: ScreenPoint::new(50, 50) }];
        let out = mark_actions(&blank_png(100, 100), &actions, 1.0).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (100, 100));
        assert!(img.get_pixel(50, 50)[0] > 200, "cross centre should be marked");
        assert_eq!(img.get_pixel(2, 98)[0], 0);
    }

    #[test]
    fn test_scale_factor_maps_back_to_frame() {
        let actions = vec![ParsedAction::Click { point: ScreenPoint::new(25, 25) }];
        let out = mark_actions(&blank_png(100, 100), &actions, 2.0).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert!(img.get_pixel(50, 50)[0] > 200);
    }

    #[test]
    fn test_actions_without_points_leave_image_unchanged() {
        let actions = vec![ParsedAction::Wait, ParsedAction::CallUser];
        let out = mark_actions(&blank_png(10, 10), &actions, 1.0).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert!(img.pixels().all(|p| p[0] == 0));
    }
}
