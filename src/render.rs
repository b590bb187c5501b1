//! Overlay rendering (feature: overlay).
//!
//! Draws player boxes in green, the ball box in magenta and court keypoints as
//! red dots onto RGB frames. With a font loaded, each box is labelled with its
//! track id and each keypoint with its index. Coordinates are clamped to the
//! image plus a small margin before drawing; boxes that fail
//! `BoundingBox::is_valid` are skipped.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::court::CourtKeypoint;
use crate::frame::Frame;
use crate::{BallPosition, BoundingBox, DetectionSequence, FrameDetections, TrackId, BALL_TRACK_ID};

pub const PLAYER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BALL_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
pub const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 5;
const LABEL_SCALE: f32 = 14.0;
/// Pixels beyond the image edge that shapes may still start at.
const CLIP_MARGIN: i32 = 16;

/// Fonts tried when no font path is given.
pub const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load a TrueType/OpenType font for labels.
pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("failed to read font {}: {}", path.display(), e))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("invalid font file {}", path.display()))
}

/// First readable font from `SYSTEM_FONT_PATHS`.
pub fn system_font() -> Option<(PathBuf, FontVec)> {
    SYSTEM_FONT_PATHS.iter().find_map(|candidate| {
        let path = PathBuf::from(candidate);
        load_font(&path).ok().map(|font| (path, font))
    })
}

/// Annotate one image in place. Labels are drawn only when `font` is given.
pub fn draw_frame(
    image: &mut RgbImage,
    players: Option<&FrameDetections>,
    ball: BallPosition,
    keypoints: &[CourtKeypoint],
    font: Option<&FontVec>,
) {
    if let Some(players) = players {
        for (id, bbox) in players.iter() {
            draw_box(image, bbox, PLAYER_COLOR, font.map(|f| (f, format!("Player ID {}", id))));
        }
    }
    if let Some(bbox) = ball.known() {
        draw_box(image, &bbox, BALL_COLOR, font.map(|f| (f, ball_label(BALL_TRACK_ID))));
    }
    for (i, k) in keypoints.iter().enumerate() {
        if !(k.x.is_finite() && k.y.is_finite()) {
            continue;
        }
        let (w, h) = image.dimensions();
        let (x, y) = (clamp_coord(k.x, w), clamp_coord(k.y, h));
        draw_filled_circle_mut(image, (x, y), KEYPOINT_RADIUS, KEYPOINT_COLOR);
        if let Some(font) = font {
            draw_text_mut(
                image,
                KEYPOINT_COLOR,
                x + KEYPOINT_RADIUS + 1,
                y - KEYPOINT_RADIUS - LABEL_SCALE as i32,
                PxScale::from(LABEL_SCALE),
                font,
                &i.to_string(),
            );
        }
    }
}

fn ball_label(id: TrackId) -> String {
    format!("Ball ID {}", id)
}

fn clamp_coord(v: f64, extent: u32) -> i32 {
    v.round()
        .clamp(-(CLIP_MARGIN as f64), extent as f64 + CLIP_MARGIN as f64) as i32
}

fn draw_box(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    color: Rgb<u8>,
    label: Option<(&FontVec, String)>,
) {
    if !bbox.is_valid() {
        return;
    }
    let (iw, ih) = image.dimensions();
    let x1 = clamp_coord(bbox.x1, iw);
    let y1 = clamp_coord(bbox.y1, ih);
    let w = (clamp_coord(bbox.x2, iw) - x1).max(1);
    let h = (clamp_coord(bbox.y2, ih) - y1).max(1);
    for t in 0..BOX_THICKNESS {
        let (tw, th) = (w - 2 * t, h - 2 * t);
        if tw <= 0 || th <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            image,
            Rect::at(x1 + t, y1 + t).of_size(tw as u32, th as u32),
            color,
        );
    }
    if let Some((font, text)) = label {
        // Above the box, or just inside it at the top edge.
        let above = y1 - LABEL_SCALE as i32 - 2;
        let y = if above >= 0 { above } else { y1 + BOX_THICKNESS + 1 };
        draw_text_mut(image, color, x1, y, PxScale::from(LABEL_SCALE), font, &text);
    }
}

/// Copy a decoded frame into an image buffer.
pub fn to_image(frame: &Frame) -> Result<RgbImage> {
    RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame {} does not fit {}x{}", frame.index, frame.width, frame.height))
}

/// Annotate a frame with its entries from the player and ball sequences.
pub fn annotate(
    frame: &Frame,
    players: &DetectionSequence,
    ball: &DetectionSequence,
    keypoints: &[CourtKeypoint],
    font: Option<&FontVec>,
) -> Result<RgbImage> {
    let mut image = to_image(frame)?;
    let ball_position = ball
        .get(frame.index)
        .map(FrameDetections::ball)
        .unwrap_or(BallPosition::Absent);
    draw_frame(&mut image, players.get(frame.index), ball_position, keypoints, font);
    Ok(image)
}
