//! Overlay of recognition results on the query image.

use ab_glyph::{FontArc, InvalidFont};
use facebase_core::{BoundingBox, MatchResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const BOX_THICKNESS: u32 = 4;
const LABEL_SCALE: f32 = 24.0;
const LABEL_GAP: i32 = 5;
const MATCH_COLOUR: Rgb<u8> = Rgb([0, 0, 255]);
const UNKNOWN_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Draws a labelled rectangle per face: blue for a match, red for unknown.
pub struct Annotator {
    font: FontArc,
}

impl Annotator {
    /// Annotator using the DejaVu Sans face shipped with the binary.
    pub fn bundled() -> Result<Self, InvalidFont> {
        Ok(Self {
            font: FontArc::try_from_slice(BUNDLED_FONT)?,
        })
    }

    pub fn draw_results(&self, image: &mut RgbImage, results: &[MatchResult]) {
        for result in results {
            let colour = if result.is_match() { MATCH_COLOUR } else { UNKNOWN_COLOUR };
            let Some(rect) = clip(image, &result.bounding_box) else {
                continue;
            };
            draw_thick_rect(image, rect, colour);

            // above the box, or below it when there is no room at the top
            let label_height = LABEL_SCALE as i32 + LABEL_GAP;
            let y = if rect.top() < label_height {
                rect.bottom() + LABEL_GAP
            } else {
                rect.top() - label_height
            };
            let label = result.label();
            draw_text_mut(image, colour, rect.left(), y, LABEL_SCALE, &self.font, label);
        }
    }
}

/// Part of `bbox` inside the image, if any.
fn clip(image: &RgbImage, bbox: &BoundingBox) -> Option<Rect> {
    let (width, height) = image.dimensions();
    let left = bbox.left().max(0);
    let top = bbox.top().max(0);
    let right = bbox.right().min(width as i32);
    let bottom = bbox.bottom().min(height as i32);
    (left < right && top < bottom)
        .then(|| Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}

fn draw_thick_rect(image: &mut RgbImage, rect: Rect, colour: Rgb<u8>) {
    for i in 0..BOX_THICKNESS {
        if rect.width() <= 2 * i || rect.height() <= 2 * i {
            break;
        }
        let inset = Rect::at(rect.left() + i as i32, rect.top() + i as i32)
            .of_size(rect.width() - 2 * i, rect.height() - 2 * i);
        draw_hollow_rect_mut(image, inset, colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn result(bbox: [i32; 4], name: Option<&str>) -> MatchResult {
        MatchResult {
            bounding_box: BoundingBox::try_from(bbox).unwrap(),
            name: name.map(String::from),
            distance: Some(0.1),
        }
    }

    fn inked(image: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) != BLACK)
            .count()
    }

    #[test]
    fn test_draws_outline_only() {
        let mut image = RgbImage::new(40, 40);
        Annotator::bundled()
            .unwrap()
            .draw_results(&mut image, &[result([5, 5, 35, 35], Some("alice"))]);
        assert_eq!(*image.get_pixel(5, 5), MATCH_COLOUR);
        assert_eq!(*image.get_pixel(8, 20), MATCH_COLOUR);
        assert_eq!(*image.get_pixel(34, 20), MATCH_COLOUR);
        assert_eq!(*image.get_pixel(20, 20), BLACK);
        assert_eq!(*image.get_pixel(2, 2), BLACK);
    }

    #[test]
    fn test_unknown_colour_and_clipping() {
        let mut image = RgbImage::new(20, 20);
        Annotator::bundled()
            .unwrap()
            .draw_results(&mut image, &[result([-10, -10, 50, 50], None)]);
        assert_eq!(*image.get_pixel(0, 0), UNKNOWN_COLOUR);
        assert_eq!(*image.get_pixel(19, 19), UNKNOWN_COLOUR);
        assert_eq!(*image.get_pixel(10, 10), BLACK);
    }

    #[test]
    fn test_box_outside_image_is_skipped() {
        let mut image = RgbImage::new(20, 20);
        Annotator::bundled()
            .unwrap()
            .draw_results(&mut image, &[result([30, 30, 40, 40], Some("alice"))]);
        assert_eq!(inked(&image, 0..20, 0..20), 0);
    }

    #[test]
    fn test_label_drawn_above_box() {
        let mut image = RgbImage::new(200, 140);
        Annotator::bundled()
            .unwrap()
            .draw_results(&mut image, &[result([20, 60, 120, 130], Some("alice"))]);
        // label band between the top of the image and the box
        assert!(inked(&image, 20..120, 30..60) > 0);
        assert!(inked(&image, 0..200, 0..30) == 0);
    }

    #[test]
    fn test_label_drawn_below_box_near_top_edge() {
        let mut image = RgbImage::new(200, 120);
        Annotator::bundled()
            .unwrap()
            .draw_results(&mut image, &[result([20, 2, 120, 50], None)]);
        assert!(inked(&image, 20..120, 55..85) > 0);
        assert_eq!(inked(&image, 0..200, 90..120), 0);
    }
}
