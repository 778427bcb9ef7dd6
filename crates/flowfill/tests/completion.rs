//! End-to-end runs of the completer with injected capabilities.

use image::Rgb;

use flowfill::flow::homography::estimate_alignment;
use flowfill::flow::compute_flows;
use flowfill::{
    CanvasLayout, CapabilityError, CompletionConfig, CompletionMode, ExtrapolationScale,
    FillStrategy, FlowEstimator, FlowField, FlowFillError, Frame, FrameFiller, HomographyConfig,
    Mask, VideoCompleter,
};

/// Same vector everywhere.
struct Uniform([f32; 2]);

impl FlowEstimator for Uniform {
    fn estimate_flow(&self, a: &Frame, _b: &Frame) -> Result<FlowField, CapabilityError> {
        Ok(FlowField::from_fn(a.width(), a.height(), |_, _| self.0))
    }
}

/// Paints every masked pixel mid gray.
struct Gray;

impl FrameFiller for Gray {
    fn fill(&self, frame: &Frame, mask: &Mask) -> Result<Frame, CapabilityError> {
        let mut out = frame.clone();
        for (x, y) in mask.iter_set() {
            out.put_pixel(x, y, Rgb([0.5; 3]));
        }
        Ok(out)
    }
}

struct Broken;

impl FrameFiller for Broken {
    fn fill(&self, _: &Frame, _: &Mask) -> Result<Frame, CapabilityError> {
        Err("generator offline".into())
    }
}

/// Static ramp with a block occluder sliding right by one pixel per frame.
fn occluded_video(n: usize, w: u32, h: u32) -> (Vec<Frame>, Vec<Mask>) {
    let background = Frame::from_fn(w, h, |x, y| {
        Rgb([x as f32 / w as f32, y as f32 / h as f32, 0.4])
    });
    let mut frames = Vec::new();
    let mut masks = Vec::new();
    for t in 0..n as u32 {
        let mask = Mask::from_fn(w, h, |x, y| (3 + t..7 + t).contains(&x) && (4..8).contains(&y));
        let mut f = background.clone();
        for (x, y) in mask.iter_set() {
            f.put_pixel(x, y, Rgb([1.0, 0.0, 1.0]));
        }
        frames.push(f);
        masks.push(mask);
    }
    (frames, masks)
}

fn small_config() -> CompletionConfig {
    let mut cfg = CompletionConfig::default();
    cfg.trust_mask.dilation_radius = 2;
    cfg.trust_mask.closing_radius = 1;
    cfg.convergence.max_iterations = 8;
    cfg
}

#[test]
fn removal_converges_and_restores_background() {
    let (frames, masks) = occluded_video(6, 20, 12);
    let out = VideoCompleter::new(small_config())
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .with_frame_filler(Gray)
        .run(frames, Some(masks.clone()))
        .unwrap();

    let report = &out.report;
    assert!(report.converged);
    assert_eq!(report.residual_missing, 0);
    assert_eq!(report.initial_missing, masks.iter().map(Mask::count).sum::<usize>());
    assert!(report.iterations.len() <= 8);
    assert!(out.masks.iter().all(Mask::is_empty));
    assert_eq!(report.output_size, [20, 12]);

    // pixels uncovered in some other frame come from the background, not the filler
    let (x, y) = (3, 5);
    assert!(masks[0].get(x, y) && !masks[5].get(x, y));
    let got = out.frames[0].get_pixel(x, y).0;
    assert!((got[0] - 3.0 / 20.0).abs() < 1e-4, "{got:?}");
    assert!((got[1] - 5.0 / 12.0).abs() < 1e-4, "{got:?}");
}

#[test]
fn missing_count_never_grows() {
    // the occluder covers the same column in every frame, so the filler is needed
    let (w, h) = (16, 10);
    let frames = vec![Frame::from_pixel(w, h, Rgb([0.2, 0.3, 0.4])); 5];
    let masks: Vec<Mask> = (0..5)
        .map(|t| Mask::from_fn(w, h, |x, y| (6..9).contains(&x) && y >= t as u32))
        .collect();
    let mut cfg = small_config();
    cfg.convergence.fill_strategy = FillStrategy::KeyFrame;

    let out = VideoCompleter::new(cfg)
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .with_frame_filler(Gray)
        .run(frames, Some(masks))
        .unwrap();

    let its = &out.report.iterations;
    assert!(!its.is_empty());
    for it in its {
        assert!(it.missing_after_propagation <= it.missing_before);
        assert!(it.missing_after_fill <= it.missing_after_propagation);
    }
    for pair in its.windows(2) {
        assert!(pair[1].missing_before <= pair[0].missing_after_fill);
    }
    assert!(its[0].filled_frames.len() <= 1);
    assert!(out.report.converged);
}

#[test]
fn iteration_cap_returns_best_effort() {
    let (frames, masks) = occluded_video(4, 16, 12);
    let mut cfg = small_config();
    cfg.convergence.max_iterations = 0;
    let out = VideoCompleter::new(cfg)
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .run(frames, Some(masks))
        .unwrap();
    assert!(!out.report.converged);
    assert!(out.report.iterations.is_empty());
    assert_eq!(out.report.residual_missing, out.report.initial_missing);
}

#[test]
fn filler_failure_names_the_stage() {
    let (w, h) = (12, 8);
    let frames = vec![Frame::from_pixel(w, h, Rgb([0.5; 3])); 3];
    let masks = vec![Mask::from_fn(w, h, |x, _| x == 4); 3];
    let err = VideoCompleter::new(small_config())
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .with_frame_filler(Broken)
        .run(frames, Some(masks))
        .unwrap_err();
    match err {
        FlowFillError::Capability { stage, .. } => assert_eq!(stage, "frame fill"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn extrapolation_mask_sits_outside_the_original() {
    let layout = CanvasLayout::new(10, 7, &ExtrapolationScale::default()).unwrap();
    assert_eq!((layout.width, layout.height), (20, 14));
    assert_eq!((layout.left, layout.top), (5, 3));
    let mask = layout.mask();
    assert!(!mask.get(5, 3));
    assert!(!mask.get(14, 9));
    assert!(mask.get(4, 3));
    assert!(mask.get(15, 9));
    assert!(mask.get(5, 10));
    assert_eq!(mask.count(), 20 * 14 - 10 * 7);
}

#[test]
fn extrapolation_enlarges_and_keeps_the_center() {
    let (w, h) = (8, 6);
    let frames: Vec<Frame> = (0..3)
        .map(|t| Frame::from_fn(w, h, |x, y| Rgb([0.1 * x as f32, 0.1 * y as f32, 0.1 * t as f32])))
        .collect();
    let mut cfg = small_config();
    cfg.mode = CompletionMode::VideoExtrapolation;
    cfg.extrapolation = ExtrapolationScale {
        h_scale: 1.5,
        w_scale: 1.5,
    };
    // the filler may repaint the dilated fill region; keep it on the border
    cfg.convergence.fill_dilation_radius = 0;
    let out = VideoCompleter::new(cfg)
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .with_frame_filler(Gray)
        .run(frames.clone(), None)
        .unwrap();

    assert_eq!(out.report.output_size, [12, 9]);
    assert_eq!(out.report.initial_missing, 3 * (12 * 9 - 8 * 6));
    assert!(out.report.converged);
    let (left, top) = (2, 1);
    for (t, f) in out.frames.iter().enumerate() {
        assert_eq!(f.dimensions(), (12, 9));
        for y in 0..h {
            for x in 0..w {
                assert_eq!(f.get_pixel(x + left, y + top), frames[t].get_pixel(x, y));
            }
        }
    }
}

#[test]
fn invalid_scale_is_rejected() {
    let frames = vec![Frame::new(4, 4); 2];
    let mut cfg = CompletionConfig::default();
    cfg.mode = CompletionMode::VideoExtrapolation;
    cfg.extrapolation = ExtrapolationScale {
        h_scale: 1.0,
        w_scale: 1.0,
    };
    let err = VideoCompleter::new(cfg).run(frames, None).unwrap_err();
    assert!(matches!(err, FlowFillError::InvalidScale { .. }));
}

#[test]
fn black_frames_fall_back_to_identity_alignment() {
    let black = Frame::new(32, 24);
    let cfg = HomographyConfig {
        enable: true,
        ..HomographyConfig::default()
    };
    assert!(estimate_alignment(&black, &black, &cfg).is_err());

    let frames = vec![black; 4];
    let computed = compute_flows(&frames, &Uniform([0.0, 0.0]), true, &cfg).unwrap();
    assert!(computed.flows.nonlocal.is_some());
    assert!(!computed.degraded.is_empty());
    assert!(computed.degraded.iter().all(|e| e.stage.contains("homography")));
}

#[test]
fn seamless_run_converges() {
    let (frames, masks) = occluded_video(5, 18, 12);
    let mut cfg = small_config();
    cfg.seamless = true;
    cfg.seamless_mask_dilation = 1;
    let out = VideoCompleter::new(cfg)
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .with_frame_filler(Gray)
        .run(frames, Some(masks))
        .unwrap();
    assert!(out.report.converged);
    assert!(out
        .frames
        .iter()
        .all(|f| f.pixels().all(|p| p.0.iter().all(|v| (0.0..=1.0).contains(v)))));
}

#[test]
fn zero_width_video_is_rejected() {
    let frames = vec![Frame::new(0, 6); 3];
    let masks = vec![Mask::new(0, 6); 3];
    let err = VideoCompleter::new(small_config())
        .with_flow_estimator(Uniform([0.0, 0.0]))
        .run(frames, Some(masks))
        .unwrap_err();
    assert!(matches!(err, FlowFillError::ShapeMismatch { .. }));
}
