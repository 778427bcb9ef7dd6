//! Canvas enlargement for field-of-view extrapolation.

use image::GenericImage;
use rayon::prelude::*;

use crate::config::ExtrapolationScale;
use crate::error::FlowFillError;
use crate::flow::FlowSet;
use crate::inpaint::telea_inpaint;
use crate::volume::{Frame, Mask};

const SEED_RADIUS: u32 = 3;

/// Placement of the original frame inside the enlarged canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

impl CanvasLayout {
    /// `W' = floor(w_scale·W)`, `H' = floor(h_scale·H)`, original centred
    /// with the floor of the half margin on the top/left.
    pub fn new(width: u32, height: u32, scale: &ExtrapolationScale) -> Result<Self, FlowFillError> {
        scale.validate()?;
        let outer_w = (scale.w_scale * width as f64).floor() as u32;
        let outer_h = (scale.h_scale * height as f64).floor() as u32;
        Ok(Self {
            width: outer_w,
            height: outer_h,
            left: (outer_w - width) / 2,
            top: (outer_h - height) / 2,
            inner_width: width,
            inner_height: height,
        })
    }

    /// `true` everywhere except the original rectangle.
    pub fn mask(&self) -> Mask {
        Mask::from_fn(self.width, self.height, |x, y| !self.contains(x, y))
    }

    /// Whether canvas pixel `(x, y)` lies in the original rectangle.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left
            && x < self.left + self.inner_width
            && y >= self.top
            && y < self.top + self.inner_height
    }
}

/// Frames, masks and flows moved onto an enlarged canvas.
#[derive(Debug, Clone)]
pub struct ExtendedView {
    pub layout: CanvasLayout,
    pub frames: Vec<Frame>,
    /// Extension mask per frame; also the flow trust mask.
    pub masks: Vec<Mask>,
    pub flows: FlowSet,
}

/// Zero-pad frames and flows onto the enlarged canvas and seed the new
/// border by fast-marching inpainting.
pub fn extend_view(
    frames: &[Frame],
    flows: &FlowSet,
    scale: &ExtrapolationScale,
) -> Result<ExtendedView, FlowFillError> {
    let Some(first) = frames.first() else {
        return Err(FlowFillError::TooFewFrames(0));
    };
    let layout = CanvasLayout::new(first.width(), first.height(), scale)?;
    let mask = layout.mask();

    let frames = frames
        .par_iter()
        .map(|f| {
            let mut canvas = Frame::new(layout.width, layout.height);
            canvas
                .copy_from(f, layout.left, layout.top)
                .map_err(|_| FlowFillError::ShapeMismatch {
                    what: "frames vs canvas",
                    expected: [layout.inner_width as usize, layout.inner_height as usize, 1],
                    got: [f.width() as usize, f.height() as usize, 1],
                })?;
            Ok(telea_inpaint(&canvas, &mask, SEED_RADIUS))
        })
        .collect::<Result<Vec<_>, FlowFillError>>()?;

    let flows = flows.pad(layout.width, layout.height, layout.left, layout.top);
    tracing::info!(
        width = layout.width,
        height = layout.height,
        left = layout.left,
        top = layout.top,
        "canvas extended"
    );
    Ok(ExtendedView {
        masks: vec![mask; frames.len()],
        layout,
        frames,
        flows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_for_double_scale() {
        let l = CanvasLayout::new(5, 3, &ExtrapolationScale::default()).unwrap();
        assert_eq!((l.width, l.height), (10, 6));
        assert_eq!((l.left, l.top), (2, 1));
        let m = l.mask();
        assert_eq!(m.count(), 60 - 15);
        assert!(!m.get(2, 1) && !m.get(6, 3));
        assert!(m.get(1, 1) && m.get(7, 3) && m.get(2, 0) && m.get(2, 4));
    }

    #[test]
    fn odd_margins_round_down_on_top_left() {
        let scale = ExtrapolationScale {
            h_scale: 1.5,
            w_scale: 1.0,
        };
        let l = CanvasLayout::new(4, 5, &scale).unwrap();
        assert_eq!((l.width, l.height), (4, 7));
        assert_eq!((l.left, l.top), (0, 1));
    }
}
