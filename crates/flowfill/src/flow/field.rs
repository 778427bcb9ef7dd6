//! Dense 2-D flow fields and direction-tagged flow volumes.

use image::Luma;

use crate::direction::{Direction, NUM_ANCHORS};
use crate::volume::Plane;

/// Dense per-pixel displacement `[dx, dy]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    width: u32,
    height: u32,
    data: Vec<[f32; 2]>,
}

impl FlowField {
    /// Zero flow.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![[0.0; 2]; width as usize * height as usize],
        }
    }

    /// Build from a function of pixel coordinates.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [f32; 2]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap row-major vectors; `None` if the length does not match.
    pub fn from_vec(width: u32, height: u32, data: Vec<[f32; 2]>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Assemble from separate x / y planes.
    pub fn from_planes(u: &Plane, v: &Plane) -> Self {
        let (w, h) = u.dimensions();
        Self::from_fn(w, h, |x, y| [u.get_pixel(x, y)[0], v.get_pixel(x, y)[0]])
    }

    /// Split into x / y planes.
    pub fn to_planes(&self) -> [Plane; 2] {
        [
            Plane::from_fn(self.width, self.height, |x, y| Luma([self.get(x, y)[0]])),
            Plane::from_fn(self.width, self.height, |x, y| Luma([self.get(x, y)[1]])),
        ]
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[[f32; 2]] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 2] {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, v: [f32; 2]) {
        let i = y as usize * self.width as usize + x as usize;
        self.data[i] = v;
    }

    /// Bilinear sample at a sub-pixel position, clamped to the field.
    pub fn sample(&self, x: f32, y: f32) -> [f32; 2] {
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let a = self.get(x0, y0);
        let b = self.get(x1, y0);
        let c = self.get(x0, y1);
        let d = self.get(x1, y1);
        let mut out = [0.0f32; 2];
        for k in 0..2 {
            let top = a[k] * (1.0 - fx) + b[k] * fx;
            let bottom = c[k] * (1.0 - fx) + d[k] * fx;
            out[k] = top * (1.0 - fy) + bottom * fy;
        }
        out
    }

    /// Per-pixel vector length.
    pub fn magnitude(&self) -> Plane {
        Plane::from_fn(self.width, self.height, |x, y| {
            let [u, v] = self.get(x, y);
            Luma([(u * u + v * v).sqrt()])
        })
    }

    /// Largest vector length (0 for an empty field).
    pub fn max_magnitude(&self) -> f32 {
        self.data
            .iter()
            .map(|[u, v]| (u * u + v * v).sqrt())
            .filter(|m| m.is_finite())
            .fold(0.0, f32::max)
    }

    /// Copy into a larger zero canvas at `(left, top)`.
    pub fn pad(&self, width: u32, height: u32, left: u32, top: u32) -> Self {
        let mut out = Self::zeros(width, height);
        for y in 0..self.height {
            for x in 0..self.width {
                out.set(x + left, y + top, self.get(x, y));
            }
        }
        out
    }
}

/// Flow fields of one [`Direction`] across a whole video.
///
/// Local directions hold `N - 1` pair fields; non-local directions hold
/// `NUM_ANCHORS` fields per source frame at `frame * NUM_ANCHORS + slot`.
#[derive(Debug, Clone)]
pub struct FlowVolume {
    direction: Direction,
    n_frames: usize,
    fields: Vec<FlowField>,
}

impl FlowVolume {
    /// Wrap fields; panics in debug builds if the count disagrees with the
    /// direction's indexing rule.
    pub fn new(direction: Direction, n_frames: usize, fields: Vec<FlowField>) -> Self {
        debug_assert_eq!(fields.len(), direction.field_count(n_frames));
        Self {
            direction,
            n_frames,
            fields,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of video frames the volume was computed for.
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FlowField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<FlowField> {
        self.fields
    }

    /// Field by flat index.
    pub fn field(&self, index: usize) -> &FlowField {
        &self.fields[index]
    }

    /// Non-local field for `(frame, anchor slot)`.
    pub fn anchor(&self, frame: usize, slot: usize) -> &FlowField {
        debug_assert!(self.direction.is_nonlocal());
        &self.fields[frame * NUM_ANCHORS + slot]
    }

    /// `(width, height)` of the fields, if any.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.fields.first().map(FlowField::dimensions)
    }

    /// Zero-pad every field into a larger canvas.
    pub fn pad(&self, width: u32, height: u32, left: u32, top: u32) -> Self {
        Self {
            direction: self.direction,
            n_frames: self.n_frames,
            fields: self
                .fields
                .iter()
                .map(|f| f.pad(width, height, left, top))
                .collect(),
        }
    }
}

/// Forward/backward and optional non-local volumes of one run.
#[derive(Debug, Clone)]
pub struct FlowSet {
    pub forward: FlowVolume,
    pub backward: FlowVolume,
    pub nonlocal: Option<NonLocalFlows>,
}

/// Non-local flow pair.
#[derive(Debug, Clone)]
pub struct NonLocalFlows {
    pub forward: FlowVolume,
    pub backward: FlowVolume,
}

impl FlowSet {
    /// Every volume in [`Direction::ALL`] order.
    pub fn volumes(&self) -> Vec<&FlowVolume> {
        let mut out = vec![&self.forward, &self.backward];
        if let Some(nl) = &self.nonlocal {
            out.push(&nl.forward);
            out.push(&nl.backward);
        }
        out
    }

    /// Zero-pad every volume into a larger canvas.
    pub fn pad(&self, width: u32, height: u32, left: u32, top: u32) -> Self {
        Self {
            forward: self.forward.pad(width, height, left, top),
            backward: self.backward.pad(width, height, left, top),
            nonlocal: self.nonlocal.as_ref().map(|nl| NonLocalFlows {
                forward: nl.forward.pad(width, height, left, top),
                backward: nl.backward.pad(width, height, left, top),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bilinear_sample_matches_linear_field() {
        let f = FlowField::from_fn(6, 5, |x, y| [x as f32 * 0.5, y as f32 - 1.0]);
        let s = f.sample(2.25, 3.5);
        assert_relative_eq!(s[0], 1.125, epsilon = 1e-6);
        assert_relative_eq!(s[1], 2.5, epsilon = 1e-6);
    }

    #[test]
    fn pad_places_field_at_offset() {
        let f = FlowField::from_fn(2, 2, |_, _| [1.0, -1.0]);
        let p = f.pad(6, 4, 2, 1);
        assert_eq!(p.get(2, 1), [1.0, -1.0]);
        assert_eq!(p.get(3, 2), [1.0, -1.0]);
        assert_eq!(p.get(0, 0), [0.0, 0.0]);
        assert_eq!(p.get(4, 1), [0.0, 0.0]);
    }

    #[test]
    fn planes_roundtrip() {
        let f = FlowField::from_fn(3, 3, |x, y| [x as f32, -(y as f32)]);
        let [u, v] = f.to_planes();
        assert_eq!(FlowField::from_planes(&u, &v), f);
        assert_relative_eq!(f.max_magnitude(), 8f32.sqrt(), epsilon = 1e-6);
    }
}
