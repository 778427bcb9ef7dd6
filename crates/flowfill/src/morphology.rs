//! Binary morphology on [`Mask`]s: dilation, closing, hole filling, and the
//! derived trust / gradient masks.
//!
//! Dilation and closing delegate to `imageproc::morphology`; hole filling
//! labels background components with `imageproc::region_labelling`.

use image::Luma;
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::TrustMaskConfig;
use crate::volume::Mask;

/// Dilate by `radius` pixels.
///
/// `Norm::L1` reproduces repeated dilation with a 3×3 cross; `Norm::LInf`
/// is a square structuring element of side `2 * radius + 1`.
pub fn dilate(mask: &Mask, norm: Norm, radius: u8) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let out = imageproc::morphology::dilate(&mask.to_gray(), norm, radius);
    Mask::from_gray(&out, 0)
}

/// Morphological closing (dilate then erode) by `radius`.
pub fn close(mask: &Mask, norm: Norm, radius: u8) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let out = imageproc::morphology::close(&mask.to_gray(), norm, radius);
    Mask::from_gray(&out, 0)
}

/// Fill holes: known regions not 4-connected to the frame border become unknown.
pub fn fill_holes(mask: &Mask) -> Mask {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    // Unknown pixels are the background here; known regions get labels.
    let labels = connected_components(&mask.to_gray(), Connectivity::Four, Luma([255u8]));

    let mut touches_border = vec![false; 1];
    let mark = |label: u32, touches: &mut Vec<bool>| {
        let l = label as usize;
        if l >= touches.len() {
            touches.resize(l + 1, false);
        }
        touches[l] = true;
    };
    for x in 0..w {
        mark(labels.get_pixel(x, 0)[0], &mut touches_border);
        mark(labels.get_pixel(x, h - 1)[0], &mut touches_border);
    }
    for y in 0..h {
        mark(labels.get_pixel(0, y)[0], &mut touches_border);
        mark(labels.get_pixel(w - 1, y)[0], &mut touches_border);
    }

    Mask::from_fn(w, h, |x, y| {
        if mask.get(x, y) {
            return true;
        }
        let l = labels.get_pixel(x, y)[0] as usize;
        !touches_border.get(l).copied().unwrap_or(false)
    })
}

/// Mask of unknown forward differences: `g[p] = m[p] | m[p + y] | m[p + x]`.
///
/// A gradient at `p` depends on `p` and its right/bottom neighbour, so it is
/// unknown as soon as either endpoint is.
pub fn gradient_mask(mask: &Mask) -> Mask {
    let (w, h) = mask.dimensions();
    Mask::from_fn(w, h, |x, y| {
        mask.get(x, y)
            || (y + 1 < h && mask.get(x, y + 1))
            || (x + 1 < w && mask.get(x + 1, y))
    })
}

/// Region whose flow vectors are due for completion.
///
/// Dilates the raw mask so pixels near the occluder are not trusted, closes
/// small gaps inside the object, and fills enclosed holes.
pub fn trust_mask(mask: &Mask, config: &TrustMaskConfig) -> Mask {
    let dilated = dilate(mask, Norm::L1, config.dilation_radius);
    let closed = close(&dilated, Norm::LInf, config.closing_radius);
    fill_holes(&closed)
}
