//! Frame, plane, and mask containers shared by every stage.

use image::{GrayImage, ImageBuffer, Luma, Rgb};

use crate::error::FlowFillError;

/// RGB frame with channel values in `[0, 1]`.
pub type Frame = image::Rgb32FImage;

/// Single-channel `f32` field (flow component, gradient channel, edge map).
pub type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Boolean per-pixel mask; `true` marks an unknown pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// All-known mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// All-unknown mask.
    pub fn filled(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![true; width as usize * height as usize],
        }
    }

    /// Build from a predicate over pixel coordinates.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
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

    /// Threshold a grayscale image: pixels strictly above `threshold` are unknown.
    pub fn from_gray(img: &GrayImage, threshold: u8) -> Self {
        let (w, h) = img.dimensions();
        Self {
            width: w,
            height: h,
            data: img.pixels().map(|p| p[0] > threshold).collect(),
        }
    }

    /// Render as a 0/255 grayscale image (for `imageproc` morphology).
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
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

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }

    /// Number of unknown pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// `true` when no pixel is unknown.
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Mark every pixel known.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = false);
    }

    /// Coordinates of unknown pixels in row-major order.
    pub fn iter_set(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let w = self.width as usize;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(move |(i, _)| ((i % w) as u32, (i / w) as u32))
    }

    /// Raw row-major data.
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Pixel-wise AND.
    pub fn intersection(&self, other: &Mask) -> Mask {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        Mask {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| a && b)
                .collect(),
        }
    }
}

/// Total unknown pixels across a mask volume.
pub fn count_missing(masks: &[Mask]) -> usize {
    masks.iter().map(Mask::count).sum()
}

/// Bilinear RGB sample; coordinates are clamped to the frame.
pub(crate) fn sample_rgb_bilinear(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = frame.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p00 = frame.get_pixel(x0, y0).0;
    let p10 = frame.get_pixel(x1, y0).0;
    let p01 = frame.get_pixel(x0, y1).0;
    let p11 = frame.get_pixel(x1, y1).0;
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Split a frame into three planes.
pub(crate) fn split_channels(frame: &Frame) -> [Plane; 3] {
    let (w, h) = frame.dimensions();
    std::array::from_fn(|c| Plane::from_fn(w, h, |x, y| Luma([frame.get_pixel(x, y)[c]])))
}

/// Merge three planes into a frame.
pub(crate) fn merge_channels(planes: &[Plane; 3]) -> Frame {
    let (w, h) = planes[0].dimensions();
    Frame::from_fn(w, h, |x, y| {
        Rgb([
            planes[0].get_pixel(x, y)[0],
            planes[1].get_pixel(x, y)[0],
            planes[2].get_pixel(x, y)[0],
        ])
    })
}

/// Clamp every channel of a frame to `[0, 1]`.
pub(crate) fn clamp_unit(frame: &mut Frame) {
    for v in frame.iter_mut() {
        *v = v.clamp(0.0, 1.0);
    }
}

// ── Shape validation ───────────────────────────────────────────────────────

/// Check that every frame shares the first frame's dimensions and that masks
/// are aligned 1:1 with frames.
pub(crate) fn validate_shapes(frames: &[Frame], masks: Option<&[Mask]>) -> Result<(), FlowFillError> {
    if frames.len() < 2 {
        return Err(FlowFillError::TooFewFrames(frames.len()));
    }
    let (w, h) = frames[0].dimensions();
    let n = frames.len();
    if w == 0 || h == 0 {
        return Err(FlowFillError::ShapeMismatch {
            what: "empty frames",
            expected: [w.max(1) as usize, h.max(1) as usize, n],
            got: [w as usize, h as usize, n],
        });
    }
    for f in frames {
        if f.dimensions() != (w, h) {
            return Err(FlowFillError::ShapeMismatch {
                what: "frames",
                expected: [w as usize, h as usize, n],
                got: [f.width() as usize, f.height() as usize, n],
            });
        }
    }
    if let Some(masks) = masks {
        if masks.len() != n {
            return Err(FlowFillError::ShapeMismatch {
                what: "masks vs frames",
                expected: [w as usize, h as usize, n],
                got: [w as usize, h as usize, masks.len()],
            });
        }
        for m in masks {
            if m.dimensions() != (w, h) {
                return Err(FlowFillError::ShapeMismatch {
                    what: "masks vs frames",
                    expected: [w as usize, h as usize, n],
                    got: [m.width() as usize, m.height() as usize, masks.len()],
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_roundtrips_through_gray() {
        let m = Mask::from_fn(5, 4, |x, y| (x + y) % 3 == 0);
        let back = Mask::from_gray(&m.to_gray(), 127);
        assert_eq!(m, back);
        assert_eq!(m.count(), m.iter_set().count());
    }

    #[test]
    fn bilinear_sample_interpolates_between_pixels() {
        let mut f = Frame::new(2, 1);
        f.put_pixel(0, 0, Rgb([0.0, 0.0, 0.0]));
        f.put_pixel(1, 0, Rgb([1.0, 0.5, 0.25]));
        let v = sample_rgb_bilinear(&f, 0.5, 0.0);
        assert!((v[0] - 0.5).abs() < 1e-6);
        assert!((v[1] - 0.25).abs() < 1e-6);
        assert!((v[2] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn validation_rejects_misaligned_masks() {
        let frames = vec![Frame::new(4, 4), Frame::new(4, 4)];
        let masks = vec![Mask::new(4, 4)];
        assert!(matches!(
            validate_shapes(&frames, Some(&masks)),
            Err(FlowFillError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            validate_shapes(&frames[..1], None),
            Err(FlowFillError::TooFewFrames(1))
        ));
    }

    #[test]
    fn validation_rejects_degenerate_frames() {
        for (w, h) in [(0, 5), (5, 0), (0, 0)] {
            let frames = vec![Frame::new(w, h); 3];
            assert!(matches!(
                validate_shapes(&frames, None),
                Err(FlowFillError::ShapeMismatch { what: "empty frames", .. })
            ));
        }
    }
}
