//! Debug overlay: marker outlines drawn onto the working image.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_line_segment_mut};
use tagpose_types::RawDetection;

/// One colour per quad edge so the corner order is visible: 0→1 red,
/// 1→2 green, 2→3 blue, 3→0 magenta.
pub const EDGE_COLORS: [Rgb<u8>; 4] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

pub const CENTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Draw every detection's outline and centre onto `canvas`.
pub fn annotate(canvas: &mut RgbImage, detections: &[&RawDetection]) {
    for det in detections {
        for (i, color) in EDGE_COLORS.iter().enumerate() {
            let a = det.corners[i];
            let b = det.corners[(i + 1) % 4];
            draw_line_segment_mut(
                canvas,
                (a[0] as f32, a[1] as f32),
                (b[0] as f32, b[1] as f32),
                *color,
            );
        }
        draw_cross_mut(
            canvas,
            CENTER_COLOR,
            det.center[0].round() as i32,
            det.center[1].round() as i32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagpose_types::DecodingMetadata;

    fn detection() -> RawDetection {
        RawDetection {
            id: 0,
            corners: [[10.0, 30.0], [30.0, 30.0], [30.0, 10.0], [10.0, 10.0]],
            center: [20.0, 20.0],
            observed_perimeter: 80.0,
            decoding: DecodingMetadata::default(),
        }
    }

    #[test]
    fn edges_use_their_own_colours() {
        let mut canvas = RgbImage::new(40, 40);
        let det = detection();
        annotate(&mut canvas, &[&det]);

        assert_eq!(*canvas.get_pixel(20, 30), EDGE_COLORS[0]);
        assert_eq!(*canvas.get_pixel(30, 20), EDGE_COLORS[1]);
        assert_eq!(*canvas.get_pixel(20, 10), EDGE_COLORS[2]);
        assert_eq!(*canvas.get_pixel(10, 20), EDGE_COLORS[3]);
        assert_eq!(*canvas.get_pixel(20, 20), CENTER_COLOR);
    }

    #[test]
    fn nothing_drawn_without_detections() {
        let mut canvas = RgbImage::new(8, 8);
        annotate(&mut canvas, &[]);
        assert!(canvas.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn off_canvas_corners_do_not_panic() {
        let mut canvas = RgbImage::new(8, 8);
        let mut det = detection();
        det.corners = [[-50.0, -50.0], [500.0, -50.0], [500.0, 500.0], [-50.0, 500.0]];
        det.center = [225.0, 225.0];
        annotate(&mut canvas, &[&det]);
    }
}
