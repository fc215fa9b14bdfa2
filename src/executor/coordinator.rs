// Quantized box → device pixel mapping.
use std::sync::OnceLock;

use regex::Regex;

use crate::action::types::ScreenPoint;
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::ScreenshotContext;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex"))
}

/// Parses `[x1, y1, x2, y2]` (or a bare `(x, y)` point) into its four corners.
pub fn parse_box(box_str: &str) -> PilotResult<[f64; 4]> {
    let nums: Vec<f64> = number_re()
        .find_iter(box_str)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();
    match nums.as_slice() {
        [x, y] => Ok([*x, *y, *x, *y]),
        [x1, y1, x2, y2] => Ok([*x1, *y1, *x2, *y2]),
        _ => Err(PilotError::Parse(format!(
            "expected 2 or 4 coordinates in `{box_str}`, found {}",
            nums.len()
        ))),
    }
}

/// Maps a model box in quantized space to the centre point on the device.
///
/// The box is divided by `factors` (`[width, height]` of the quantized space),
/// its centre is scaled to the screenshot's pixel size and then divided by the
/// screenshot's scale factor, so the result is in the input space of the
/// operator that produced the screenshot. Output is rounded and clamped to the frame.
pub fn map_box(
    box_str: &str,
    factors: [f64; 2],
    screen: &ScreenshotContext,
) -> PilotResult<ScreenPoint> {
    let [fw, fh] = factors;
    if fw <= 0.0 || fh <= 0.0 {
        return Err(PilotError::Parse(format!("invalid quantization factors {factors:?}")));
    }
    let [x1, y1, x2, y2] = parse_box(box_str)?;

    let rel_x = ((x1 + x2) / 2.0 / fw).clamp(0.0, 1.0);
    let rel_y = ((y1 + y2) / 2.0 / fh).clamp(0.0, 1.0);

    let x = (rel_x * screen.width as f64 / screen.scale_factor).round() as i32;
    let y = (rel_y * screen.height as f64 / screen.scale_factor).round() as i32;

    Ok(ScreenPoint::new(
        x.clamp(0, screen.width as i32),
        y.clamp(0, screen.height as i32),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: [f64; 2] = [1000.0, 1000.0];

    #[test]
    fn test_maps_box_centre_on_phone_frame() {
        let screen = ScreenshotContext::new(1080, 2400, 1.0);
        let p = map_box("[500,500,600,600]", F, &screen).unwrap();
        assert_eq!(p, ScreenPoint::new(594, 1320));
    }

    #[test]
    fn test_point_form_and_spacing() {
        let screen = ScreenshotContext::new(1000, 1000, 1.0);
        assert_eq!(map_box("(250, 750)", F, &screen).unwrap(), ScreenPoint::new(250, 750));
        assert_eq!(
            map_box("<|box_start|>(100,200)<|box_end|>", F, &screen).unwrap(),
            ScreenPoint::new(100, 200)
        );
    }

    #[test]
    fn test_scale_factor_converts_to_logical_points() {
        let screen = ScreenshotContext::new(2880, 1800, 2.0);
        let p = map_box("[500, 500, 500, 500]", F, &screen).unwrap();
        assert_eq!(p, ScreenPoint::new(720, 450));
    }

    #[test]
    fn test_mapping_is_deterministic_and_in_bounds() {
        let screen = ScreenshotContext::new(1920, 1080, 1.0);
        for b in ["[0,0,0,0]", "[1000,1000,1000,1000]", "[999,1,3,998]", "[1200,-50,1300,-10]"] {
            let a = map_box(b, F, &screen).unwrap();
            assert_eq!(a, map_box(b, F, &screen).unwrap());
            assert!((0..=1920).contains(&a.x), "{b} → {a}");
            assert!((0..=1080).contains(&a.y), "{b} → {a}");
        }
    }

    #[test]
    fn test_non_square_factors() {
        let screen = ScreenshotContext::new(1000, 500, 1.0);
        let p = map_box("[64, 32, 64, 32]", [128.0, 64.0], &screen).unwrap();
        assert_eq!(p, ScreenPoint::new(500, 250));
    }

    #[test]
    fn test_bad_boxes_rejected() {
        let screen = ScreenshotContext::new(100, 100, 1.0);
        assert!(map_box("[1,2,3]", F, &screen).is_err());
        assert!(map_box("nowhere", F, &screen).is_err());
        assert!(map_box("[1,2]", [0.0, 1000.0], &screen).is_err());
    }
}
