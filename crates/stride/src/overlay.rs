//! 2D skeleton overlay on top of the camera image.

use stride_body::{
    landmark::{connection_side, Side, BODY_CONNECTIONS},
    Landmark, LandmarkIdx,
};

use crate::image::{draw, Color, Image, Resolution};

/// Landmarks less visible than this are not drawn.
const MIN_VISIBILITY: f32 = 0.5;

/// Stroke width and marker size for a capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    pub stroke_width: u32,
    /// Always odd.
    pub marker_size: u32,
}

impl OverlayStyle {
    /// Scales the overlay with the shorter image side, so it stays legible at any resolution.
    pub fn for_resolution(res: Resolution) -> Self {
        let stroke_width = (res.min_side() / 240).max(1);
        Self {
            stroke_width,
            marker_size: stroke_width * 2 + 3,
        }
    }
}

pub fn side_color(side: Side) -> Color {
    match side {
        Side::Left => Color::ORANGE,
        Side::Right => Color::CYAN,
        Side::Center => Color::WHITE,
    }
}

/// Draws the body skeleton described by normalized `landmarks` onto `image`.
///
/// Facial landmarks are never drawn.
pub fn draw_overlay(image: &mut Image, landmarks: &[Landmark]) {
    let style = OverlayStyle::for_resolution(image.resolution());
    let (w, h) = (image.width() as f32, image.height() as f32);
    let to_px = |idx: LandmarkIdx| {
        landmarks
            .get(idx.index())
            .filter(|lm| lm.visibility_or_one() >= MIN_VISIBILITY)
            .map(|lm| ((lm.x * w).round() as i32, (lm.y * h).round() as i32))
    };

    for &(a, b) in BODY_CONNECTIONS {
        if let (Some((ax, ay)), Some((bx, by))) = (to_px(a), to_px(b)) {
            draw::line(image, ax, ay, bx, by)
                .stroke_width(style.stroke_width)
                .color(side_color(connection_side(a, b)));
        }
    }

    for idx in LandmarkIdx::ALL.into_iter().filter(|idx| !idx.is_facial()) {
        if let Some((x, y)) = to_px(idx) {
            draw::marker(image, x, y)
                .size(style.marker_size)
                .color(side_color(idx.side()));
        }
    }
}
