//! Evaluation epochs: model output to scored, camera-frame predictions.

use crate::camera::Intrinsics;
use crate::dataset::ViewSample;
use crate::evaluation::{analyze, parse_epoch, BatchStats, EpochStats, PredictionWriter};
use crate::heatmap::{decode, flip_average, to_coordinate, to_heatmap, PlanarUnits};
use crate::sample::JointInfo;
use crate::training::{Criterion, PipelineConfig, PoseModel, TrainingError};
use nalgebra::{Matrix3, Vector3};
use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView3, Axis};
use std::path::PathBuf;

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// One evaluation batch.
#[derive(Debug, Clone)]
pub struct EvalBatch {
    /// Network input `(batch, channel, side_in, side_in)`.
    pub input: Array4<f32>,
    /// True joints in the input camera frame, `(batch, joint, 3)`.
    pub true_cam: Array3<f32>,
    pub valid: Array2<bool>,
    /// Per-sample rotation back into the stored camera frame.
    pub back_rotation: Vec<Matrix3<f64>>,
    /// Per-sample intrinsics of the input camera.
    pub intrinsics: Vec<Intrinsics>,
}

impl EvalBatch {
    /// Stacks synthesized views. Colors are scaled to `[0, 1]` and
    /// normalized per channel. Views without a back rotation keep their
    /// own frame.
    pub fn from_views(views: &[ViewSample]) -> Result<Self, TrainingError> {
        let first = views
            .first()
            .ok_or_else(|| TrainingError::Shape("Empty batch".to_string()))?;
        let (width, height) = first.color.dimensions();
        let joints = first.camera_coords.len();

        let mut input = Array4::<f32>::zeros((views.len(), 3, height as usize, width as usize));
        let mut true_cam = Array3::<f32>::zeros((views.len(), joints, 3));
        let mut valid = Array2::from_elem((views.len(), joints), false);

        for (b, view) in views.iter().enumerate() {
            if view.color.dimensions() != (width, height)
                || view.camera_coords.len() != joints
                || view.valid.len() != joints
            {
                return Err(TrainingError::Shape(format!(
                    "View {b} differs from the first view of the batch"
                )));
            }
            for (x, y, pixel) in view.color.enumerate_pixels() {
                for c in 0..3 {
                    input[[b, c, y as usize, x as usize]] =
                        (pixel[c] as f32 / 255.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
                }
            }
            for (j, coord) in view.camera_coords.iter().enumerate() {
                for k in 0..3 {
                    true_cam[[b, j, k]] = coord[k] as f32;
                }
                valid[[b, j]] = view.valid[j];
            }
        }

        Ok(EvalBatch {
            input,
            true_cam,
            valid,
            back_rotation: views
                .iter()
                .map(|v| v.back_rotation.unwrap_or_else(Matrix3::identity))
                .collect(),
            intrinsics: views.iter().map(|v| v.camera.intrinsics()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.true_cam.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), TrainingError> {
        let batch = self.len();
        let joints = self.true_cam.len_of(Axis(1));
        if self.input.len_of(Axis(0)) != batch
            || self.valid.dim() != (batch, joints)
            || self.back_rotation.len() != batch
            || self.intrinsics.len() != batch
        {
            return Err(TrainingError::Shape(format!(
                "Inconsistent batch: input {:?}, truth {:?}, valid {:?}, {} rotations, {} intrinsics",
                self.input.dim(),
                self.true_cam.dim(),
                self.valid.dim(),
                self.back_rotation.len(),
                self.intrinsics.len()
            )));
        }
        Ok(())
    }
}

/// Scores of one evaluation epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    /// Criterion loss averaged over samples.
    pub test_loss: f64,
    pub stats: EpochStats,
}

fn rotate(coords: &mut Array3<f32>, rotations: &[Matrix3<f64>]) {
    for (mut sample, rotation) in coords.outer_iter_mut().zip(rotations) {
        let rotation = rotation.cast::<f32>();
        for mut joint in sample.outer_iter_mut() {
            let rotated = rotation * Vector3::new(joint[0], joint[1], joint[2]);
            joint[0] = rotated.x;
            joint[1] = rotated.y;
            joint[2] = rotated.z;
        }
    }
}

/// Moves the root of `coords` onto the root of `truth`.
fn reroot(coords: &mut Array3<f32>, truth: ArrayView3<f32>, key_index: usize) {
    let offset = &truth.slice(s![.., key_index..key_index + 1, ..])
        - &coords.slice(s![.., key_index..key_index + 1, ..]);
    *coords += &offset;
}

pub struct Evaluator<'a> {
    config: &'a PipelineConfig,
    joint_info: &'a JointInfo,
    criterion: Criterion,
    export_path: Option<PathBuf>,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a PipelineConfig, joint_info: &'a JointInfo) -> Result<Self, TrainingError> {
        if joint_info.num_joints() != config.num_joints {
            return Err(TrainingError::Config(format!(
                "num_joints is {} but the skeleton has {} joints",
                config.num_joints,
                joint_info.num_joints()
            )));
        }
        Ok(Evaluator {
            config,
            joint_info,
            criterion: config.criterion.parse()?,
            export_path: config.last_path(),
        })
    }

    fn heatmap(&self, model: &mut dyn PoseModel, input: &Array4<f32>) -> Result<Array5<f32>, TrainingError> {
        let side_out = self.config.side_out();
        let output = model.forward(input.view())?;
        Ok(to_heatmap(
            output.activations.view(),
            self.config.depth,
            self.config.num_joints,
            side_out,
            side_out,
        )?)
    }

    /// Root-relative prediction placed on the true key joint, in the input
    /// camera frame.
    fn predict(&self, model: &mut dyn PoseModel, batch: &EvalBatch) -> Result<Array3<f32>, TrainingError> {
        let key_index = self.joint_info.key_index();
        let depth_range = self.config.depth_range as f32;

        let mut heatmap = self.heatmap(model, &batch.input)?;
        if self.config.flip_test {
            let flipped_input = batch.input.slice(s![.., .., .., ..;-1]).to_owned();
            let flipped = self.heatmap(model, &flipped_input)?;
            heatmap = flip_average(&heatmap, &flipped, self.joint_info.mirror())?;
        }

        let mut coords = if self.config.semi_cubic {
            let key_depth: Vec<f32> = batch
                .true_cam
                .slice(s![.., key_index, 2])
                .iter()
                .copied()
                .collect();
            to_coordinate(
                &heatmap,
                self.config.side_in as f32,
                depth_range,
                &batch.intrinsics,
                &key_depth,
                key_index,
            )?
        } else {
            decode(&heatmap, PlanarUnits::Metric, depth_range)
        };
        reroot(&mut coords, batch.true_cam.view(), key_index);
        Ok(coords)
    }

    /// Scores one batch; returns the criterion loss, the batch scores and
    /// the back-rotated prediction.
    pub fn evaluate_batch(
        &self,
        model: &mut dyn PoseModel,
        batch: &EvalBatch,
    ) -> Result<(f32, BatchStats, Array3<f32>), TrainingError> {
        batch.check()?;
        let mut prediction = self.predict(model, batch)?;
        if prediction.dim() != batch.true_cam.dim() {
            return Err(TrainingError::Shape(format!(
                "prediction {:?} vs truth {:?}",
                prediction.dim(),
                batch.true_cam.dim()
            )));
        }

        let div = self.config.loss_div as f32;
        let loss = self.criterion.loss(
            (&prediction / div).view(),
            (&batch.true_cam / div).view(),
            batch.valid.view(),
        )?;

        let mut truth = batch.true_cam.clone();
        rotate(&mut prediction, &batch.back_rotation);
        rotate(&mut truth, &batch.back_rotation);

        let stats = analyze(
            prediction.view(),
            truth.view(),
            batch.valid.view(),
            self.joint_info.mirror(),
            self.joint_info.key_index(),
            &self.config.thresholds,
        )?;
        Ok((loss, stats, prediction))
    }

    /// Runs the model over all batches and merges the scores.
    pub fn run_epoch<I>(
        &self,
        model: &mut dyn PoseModel,
        epoch: usize,
        batches: I,
    ) -> Result<EpochRecord, TrainingError>
    where
        I: IntoIterator<Item = EvalBatch>,
    {
        let mut writer = match &self.export_path {
            Some(path) => Some(PredictionWriter::create(path)?),
            None => None,
        };

        let mut loss_sum = 0.0f64;
        let mut total = 0usize;
        let mut batch_stats = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let (loss, stats, prediction) = self.evaluate_batch(model, &batch)?;
            loss_sum += loss as f64 * batch.len() as f64;
            total += batch.len();
            if let Some(writer) = writer.as_mut() {
                writer.write_batch(index, prediction.view())?;
            }
            log::info!("| test Epoch[{epoch}] [{index}]  Cam Loss {loss:.4}");
            batch_stats.push(stats);
        }
        if let Some(writer) = writer {
            writer.finish()?;
        }

        let record = EpochRecord {
            test_loss: if total == 0 { 0.0 } else { loss_sum / total as f64 },
            stats: parse_epoch(&batch_stats),
        };
        log::info!("=> test Epoch[{epoch}]  Cam Loss: {:.4}", record.test_loss);
        log::info!(
            "=> cam_mean: {:.3}  [pck]: {:.3}  [auc]: {:.3}",
            record.stats.cam_mean,
            record.stats.score_pck,
            record.stats.score_auc
        );
        Ok(record)
    }
}
