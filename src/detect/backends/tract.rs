#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};
use crate::frame::{Frame, RGB_CHANNELS};
use crate::BoundingBox;

/// COCO class id for "person".
pub const COCO_PERSON: usize = 0;
/// COCO class id for "sports ball".
pub const COCO_SPORTS_BALL: usize = 32;

/// Tract-based YOLOv8-style detector.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` with boxes as
/// `cx, cy, w, h` in model-input pixels. Frames are resampled to the model
/// input by nearest neighbour; boxes are scaled back to frame pixels.
/// Track ids are left empty; wrap in `IouTracker` to assign them.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
    player_classes: Vec<usize>,
    ball_classes: Vec<usize>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.2,
            nms_threshold: 0.45,
            player_classes: vec![COCO_PERSON],
            ball_classes: vec![COCO_SPORTS_BALL],
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the IoU threshold used for non-maximum suppression.
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    /// Map model class ids onto player / ball.
    pub fn with_class_map(mut self, player_classes: Vec<usize>, ball_classes: Vec<usize>) -> Self {
        self.player_classes = player_classes;
        self.ball_classes = ball_classes;
        self
    }

    fn object_class(&self, class_id: usize) -> ObjectClass {
        if self.player_classes.contains(&class_id) {
            ObjectClass::Player
        } else if self.ball_classes.contains(&class_id) {
            ObjectClass::Ball
        } else {
            ObjectClass::Other
        }
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame {}", frame.index));
        }
        let pixels = frame.pixels();
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, dst_h, dst_w),
            |(_, channel, y, x)| {
                let sx = (x * src_w / dst_w).min(src_w - 1);
                let sy = (y * src_h / dst_h).min(src_h - 1);
                let idx = (sy * src_w + sx) * RGB_CHANNELS + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let shape = view.shape().to_vec();
        if shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let (rows, anchors) = (shape[1], shape[2]);
        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;

        let mut candidates: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for a in 0..anchors {
            let (mut best_class, mut best_score) = (0usize, f32::NEG_INFINITY);
            for c in 4..rows {
                let score = view[[0, c, a]];
                if score > best_score {
                    best_score = score;
                    best_class = c - 4;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx) as f64,
                ((cy - h / 2.0) * sy) as f64,
                ((cx + w / 2.0) * sx) as f64,
                ((cy + h / 2.0) * sy) as f64,
            );
            candidates.push((best_class, best_score, bbox));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for cand in candidates {
            let suppressed = kept
                .iter()
                .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > self.nms_threshold as f64);
            if !suppressed {
                kept.push(cand);
            }
        }

        Ok(kept
            .into_iter()
            .map(|(class_id, score, bbox)| {
                Detection::new(self.object_class(class_id), None, bbox, score)
            })
            .collect())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, class: ObjectClass) -> bool {
        match class {
            ObjectClass::Player => !self.player_classes.is_empty(),
            ObjectClass::Ball => !self.ball_classes.is_empty(),
            _ => false,
        }
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
