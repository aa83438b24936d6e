//! Frame overlays: skeletons, boxes and the alarm banner

use image::{Rgb, RgbImage};
use mantion_core::{Detection, DetectionType, Keypoint, PresenceState};

/// COCO-17 pose edges
pub const POSE_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 7), (7, 9),
    (0, 6), (6, 8), (8, 10),
    (5, 6), (5, 11), (6, 12),
    (11, 12), (11, 13), (13, 15),
    (12, 14), (14, 16),
];

/// 21-landmark hand edges
pub const HAND_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (0, 17), (17, 18), (18, 19), (19, 20),
];

const SKELETON: Rgb<u8> = Rgb([255, 255, 0]);
const JOINT: Rgb<u8> = Rgb([255, 128, 0]);
const HUMAN_BOX: Rgb<u8> = Rgb([255, 0, 0]);
const HAND_BOX: Rgb<u8> = Rgb([255, 0, 255]);
const ALARM_BANNER: Rgb<u8> = Rgb([200, 0, 0]);
const SAFE_BANNER: Rgb<u8> = Rgb([0, 160, 0]);
const COUNT_MARK: Rgb<u8> = Rgb([255, 255, 255]);

/// Pure overlay renderer. `annotate` never touches its input.
#[derive(Debug, Clone, Copy)]
pub struct FrameAnnotator {
    pub line_thickness: i32,
    pub joint_radius: i32,
    pub banner_height: u32,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self {
            line_thickness: 2,
            joint_radius: 4,
            banner_height: 20,
        }
    }
}

impl FrameAnnotator {
    pub fn annotate(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        state: PresenceState,
    ) -> RgbImage {
        let mut out = frame.clone();

        for detection in detections {
            let edges = match detection.kind {
                DetectionType::Human => POSE_CONNECTIONS,
                DetectionType::Hand => HAND_CONNECTIONS,
            };
            self.draw_skeleton(&mut out, &detection.keypoints, edges);

            let color = match detection.kind {
                DetectionType::Human => HUMAN_BOX,
                DetectionType::Hand => HAND_BOX,
            };
            let b = detection.bbox;
            let (x1, y1, x2, y2) = (
                i64::from(b.x1()),
                i64::from(b.y1()),
                i64::from(b.x2()),
                i64::from(b.y2()),
            );
            draw_rect(&mut out, x1, y1, x2, y2, i64::from(self.line_thickness), color);

            // Confidence bar sits just above the box, full box width at 1.0
            let bar_len = ((x2 - x1) as f64 * f64::from(detection.confidence)).round() as i64;
            fill_rect(&mut out, x1, y1 - 6, x1 + bar_len, y1 - 2, color);
        }

        self.draw_banner(&mut out, state, detections.len());
        out
    }

    fn draw_skeleton(&self, img: &mut RgbImage, keypoints: &[Keypoint], edges: &[(usize, usize)]) {
        for &(i, j) in edges {
            if let (Some(&a), Some(&b)) = (keypoints.get(i), keypoints.get(j)) {
                if visible(a) && visible(b) {
                    draw_line(img, widen(a), widen(b), i64::from(self.line_thickness), SKELETON);
                }
            }
        }
        for &point in keypoints.iter().filter(|p| visible(**p)) {
            fill_circle(img, widen(point), i64::from(self.joint_radius), JOINT);
        }
    }

    fn draw_banner(&self, img: &mut RgbImage, state: PresenceState, count: usize) {
        let color = if state.is_alarm() { ALARM_BANNER } else { SAFE_BANNER };
        let height = i64::from(self.banner_height.min(img.height()));
        fill_rect(img, 0, 0, i64::from(img.width()), height, color);

        // One tick per detection, as many as fit
        let tick = (height / 2).max(2);
        let mut x = 4;
        for _ in 0..count {
            if x >= i64::from(img.width()) {
                break;
            }
            fill_rect(img, x, tick / 2, x + tick, tick / 2 + tick, COUNT_MARK);
            x += tick + 3;
        }
    }
}

/// Detectors report unseen keypoints as (0, 0)
fn visible((x, y): Keypoint) -> bool {
    x > 0 || y > 0
}

fn widen((x, y): Keypoint) -> (i64, i64) {
    (i64::from(x), i64::from(y))
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(img.width()) && y < i64::from(img.height()) {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Fill the half-open rectangle [x1, x2) x [y1, y2), clipped to the image
fn fill_rect(img: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let x1 = x1.max(0);
    let y1 = y1.max(0);
    let x2 = x2.min(i64::from(img.width()));
    let y2 = y2.min(i64::from(img.height()));
    for y in y1..y2 {
        for x in x1..x2 {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_rect(img: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, thickness: i64, color: Rgb<u8>) {
    let t = thickness.max(1);
    fill_rect(img, x1, y1, x2 + 1, y1 + t, color);
    fill_rect(img, x1, y2 - t + 1, x2 + 1, y2 + 1, color);
    fill_rect(img, x1, y1, x1 + t, y2 + 1, color);
    fill_rect(img, x2 - t + 1, y1, x2 + 1, y2 + 1, color);
}

fn fill_circle(img: &mut RgbImage, (cx, cy): (i64, i64), radius: i64, color: Rgb<u8>) {
    let r2 = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= r2 {
                put(img, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Liang-Barsky: the part of segment `a`-`b` inside `[min, max]` on both axes
fn clip_segment(
    a: (i64, i64),
    b: (i64, i64),
    min: (i64, i64),
    max: (i64, i64),
) -> Option<((i64, i64), (i64, i64))> {
    let (x0, y0) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = ((b.0 - a.0) as f64, (b.1 - a.1) as f64);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (p, q) in [
        (-dx, x0 - min.0 as f64),
        (dx, max.0 as f64 - x0),
        (-dy, y0 - min.1 as f64),
        (dy, max.1 as f64 - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((x0 + t * dx).round() as i64, (y0 + t * dy).round() as i64);
    Some((at(t0), at(t1)))
}

/// Bresenham over the visible part of the segment, thickened by stamping a
/// small square at every step
fn draw_line(img: &mut RgbImage, a: (i64, i64), b: (i64, i64), thickness: i64, color: Rgb<u8>) {
    let t = thickness.max(1);
    let min = (-t, -t);
    let max = (i64::from(img.width()) + t, i64::from(img.height()) + t);
    let Some(((x0, y0), (x1, y1))) = clip_segment(a, b, min, max) else {
        return;
    };

    let half = (t - 1) / 2;
    let extra = (t - 1) - half;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);

    loop {
        for oy in -half..=extra {
            for ox in -half..=extra {
                put(img, x + ox, y + oy, color);
            }
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantion_core::BoundingBox;

    fn blank() -> RgbImage {
        RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]))
    }

    fn person() -> Detection {
        let mut keypoints = vec![(0, 0); 17];
        keypoints[5] = (40, 40);
        keypoints[6] = (60, 40);
        Detection::new(
            DetectionType::Human,
            0.5,
            BoundingBox::new(30, 30, 70, 75).unwrap(),
            keypoints,
        )
        .unwrap()
    }

    #[test]
    fn test_annotate_leaves_input_untouched() {
        let frame = blank();
        let out = FrameAnnotator::default().annotate(&frame, &[person()], PresenceState::Alarm);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
        assert_ne!(out, frame);
    }

    #[test]
    fn test_banner_color_follows_state() {
        let annotator = FrameAnnotator::default();
        let alarm = annotator.annotate(&blank(), &[], PresenceState::Alarm);
        let safe = annotator.annotate(&blank(), &[], PresenceState::Safe);
        assert_eq!(*alarm.get_pixel(99, 5), ALARM_BANNER);
        assert_eq!(*safe.get_pixel(99, 5), SAFE_BANNER);
        // below the banner nothing changes
        assert_eq!(*safe.get_pixel(50, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_skeleton_and_confidence_bar_drawn() {
        let out = FrameAnnotator::default().annotate(&blank(), &[person()], PresenceState::Safe);
        assert_eq!(*out.get_pixel(30, 50), HUMAN_BOX);
        assert_eq!(*out.get_pixel(70, 50), HUMAN_BOX);
        // shoulder-to-shoulder edge
        assert_eq!(*out.get_pixel(50, 40), SKELETON);
        assert_eq!(*out.get_pixel(40, 40), JOINT);
        // bar covers half the box width at confidence 0.5
        assert_eq!(*out.get_pixel(45, 26), HUMAN_BOX);
        assert_eq!(*out.get_pixel(55, 26), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_keypoints_not_drawn() {
        let out = FrameAnnotator::default().annotate(&blank(), &[person()], PresenceState::Safe);
        // nose at (0, 0) is hidden; edge 0->5 must not reach the corner area
        assert_eq!(*out.get_pixel(10, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_frame_box_is_clipped() {
        let d = Detection::human(0.9, BoundingBox::new(-50, -50, 500, 500).unwrap()).unwrap();
        let out = FrameAnnotator::default().annotate(&blank(), &[d], PresenceState::Alarm);
        assert_eq!(out.dimensions(), (100, 80));
    }

    #[test]
    fn test_extreme_coordinates_are_clipped() {
        let wide = BoundingBox::new(0, 30, i32::MAX, 40).unwrap();
        let huge = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX).unwrap();
        let detections = vec![
            Detection::human(1.0, wide).unwrap(),
            Detection::human(0.7, huge).unwrap(),
        ];
        let out = FrameAnnotator::default().annotate(&blank(), &detections, PresenceState::Alarm);
        assert_eq!(*out.get_pixel(0, 35), HUMAN_BOX);
        assert_eq!(*out.get_pixel(99, 30), HUMAN_BOX);
        // the right edge is far off-frame
        assert_eq!(*out.get_pixel(99, 35), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_far_keypoints_draw_only_the_visible_part() {
        let mut keypoints = vec![(0, 0); 17];
        keypoints[5] = (40, 50);
        keypoints[6] = (i32::MAX, 50);
        keypoints[11] = (i32::MAX, i32::MAX);
        let d = Detection::new(
            DetectionType::Human,
            0.5,
            BoundingBox::new(30, 30, 35, 35).unwrap(),
            keypoints,
        )
        .unwrap();

        let out = FrameAnnotator::default().annotate(&blank(), &[d], PresenceState::Safe);
        assert_eq!(*out.get_pixel(70, 50), SKELETON);
        assert_eq!(*out.get_pixel(99, 50), SKELETON);
        // shoulder to hip runs off the bottom edge
        assert_eq!(*out.get_pixel(60, 70), SKELETON);
        assert_eq!(*out.get_pixel(70, 70), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_clip_segment() {
        let clipped = clip_segment((-100, 5), (200, 5), (0, 0), (10, 10)).unwrap();
        assert_eq!(clipped, ((0, 5), (10, 5)));
        assert!(clip_segment((-5, -5), (-1, 20), (0, 0), (10, 10)).is_none());
        assert_eq!(clip_segment((2, 2), (3, 3), (0, 0), (10, 10)), Some(((2, 2), (3, 3))));
    }
}
