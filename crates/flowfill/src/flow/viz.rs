//! Flow visualization with the Middlebury color wheel.

use image::{Rgb, RgbImage};

use super::field::FlowField;

const RY: usize = 15;
const YG: usize = 6;
const GC: usize = 4;
const CB: usize = 11;
const BM: usize = 13;
const MR: usize = 6;

/// The 55-entry hue wheel, values in `[0, 1]`.
fn color_wheel() -> Vec<[f32; 3]> {
    let mut wheel = Vec::with_capacity(RY + YG + GC + CB + BM + MR);
    let ramp = |i: usize, n: usize| i as f32 / n as f32;
    for i in 0..RY {
        wheel.push([1.0, ramp(i, RY), 0.0]);
    }
    for i in 0..YG {
        wheel.push([1.0 - ramp(i, YG), 1.0, 0.0]);
    }
    for i in 0..GC {
        wheel.push([0.0, 1.0, ramp(i, GC)]);
    }
    for i in 0..CB {
        wheel.push([0.0, 1.0 - ramp(i, CB), 1.0]);
    }
    for i in 0..BM {
        wheel.push([ramp(i, BM), 0.0, 1.0]);
    }
    for i in 0..MR {
        wheel.push([1.0, 0.0, 1.0 - ramp(i, MR)]);
    }
    wheel
}

/// Render a flow field; hue encodes direction, saturation the magnitude
/// relative to the field's maximum.
pub fn flow_to_rgb(flow: &FlowField) -> RgbImage {
    let wheel = color_wheel();
    let ncols = wheel.len();
    let max = flow.max_magnitude().max(f32::EPSILON);
    RgbImage::from_fn(flow.width(), flow.height(), |x, y| {
        let [u, v] = flow.get(x, y);
        if !u.is_finite() || !v.is_finite() {
            return Rgb([0, 0, 0]);
        }
        let (u, v) = (u / max, v / max);
        let rad = (u * u + v * v).sqrt();
        let angle = (-v).atan2(-u) / std::f32::consts::PI;
        let fk = (angle + 1.0) / 2.0 * (ncols - 1) as f32;
        let k0 = (fk.floor() as usize).min(ncols - 1);
        let k1 = (k0 + 1) % ncols;
        let f = fk - k0 as f32;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let col = (1.0 - f) * wheel[k0][c] + f * wheel[k1][c];
            let col = if rad <= 1.0 {
                1.0 - rad * (1.0 - col)
            } else {
                col * 0.75
            };
            out[c] = (255.0 * col).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}
