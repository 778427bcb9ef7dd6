//! Sparse feature correspondences between two frames.
//!
//! FAST-9 corners (`imageproc::corners`) described by mean/variance
//! normalized intensity patches and matched brute-force with Lowe's ratio
//! test.

use image::{GrayImage, Luma};

use crate::config::HomographyConfig;
use crate::volume::{Frame, Plane};

#[derive(Debug, Clone)]
struct Keypoint {
    xy: [f64; 2],
    descriptor: Vec<f32>,
}

/// Luma of an RGB frame as 8-bit gray.
pub(crate) fn frame_to_gray8(frame: &Frame) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let p = frame.get_pixel(x, y);
        let l = 0.299 * p[0] + 0.587 * p[1] + 0.114 * p[2];
        Luma([(l.clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

fn describe(smooth: &Plane, x: u32, y: u32, r: u32) -> Option<Vec<f32>> {
    let (w, h) = smooth.dimensions();
    if x < r || y < r || x + r >= w || y + r >= h {
        return None;
    }
    let side = (2 * r + 1) as usize;
    let mut d = Vec::with_capacity(side * side);
    for yy in (y - r)..=(y + r) {
        for xx in (x - r)..=(x + r) {
            d.push(smooth.get_pixel(xx, yy)[0]);
        }
    }
    let n = d.len() as f32;
    let mean = d.iter().sum::<f32>() / n;
    let var = d.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    if var < 1e-8 {
        return None;
    }
    let inv_std = 1.0 / var.sqrt();
    d.iter_mut().for_each(|v| *v = (*v - mean) * inv_std);
    Some(d)
}

fn detect_and_describe(frame: &Frame, config: &HomographyConfig) -> Vec<Keypoint> {
    let gray = frame_to_gray8(frame);
    let mut corners = imageproc::corners::corners_fast9(&gray, config.fast_threshold);
    corners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    corners.truncate(config.max_features);

    let gray_f = Plane::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([gray.get_pixel(x, y)[0] as f32 / 255.0])
    });
    let smooth = imageproc::filter::gaussian_blur_f32(&gray_f, 1.0);

    corners
        .into_iter()
        .filter_map(|c| {
            describe(&smooth, c.x, c.y, config.patch_radius).map(|descriptor| Keypoint {
                xy: [c.x as f64, c.y as f64],
                descriptor,
            })
        })
        .collect()
}

fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Point correspondences `(points in b, points in a)` between two frames.
///
/// The ratio test keeps a match only if its best distance is below
/// `ratio` times the second best.
pub(crate) fn match_frames(
    a: &Frame,
    b: &Frame,
    config: &HomographyConfig,
) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    let kps_a = detect_and_describe(a, config);
    let kps_b = detect_and_describe(b, config);
    let mut pts_b = Vec::new();
    let mut pts_a = Vec::new();
    if kps_a.len() < 2 {
        return (pts_b, pts_a);
    }
    let ratio_sq = config.ratio * config.ratio;
    for kb in &kps_b {
        let mut best = (f32::INFINITY, usize::MAX);
        let mut second = f32::INFINITY;
        for (j, ka) in kps_a.iter().enumerate() {
            let d = sq_dist(&kb.descriptor, &ka.descriptor);
            if d < best.0 {
                second = best.0;
                best = (d, j);
            } else if d < second {
                second = d;
            }
        }
        if best.1 != usize::MAX && best.0 < ratio_sq * second {
            pts_b.push(kb.xy);
            pts_a.push(kps_a[best.1].xy);
        }
    }
    (pts_b, pts_a)
}
