//! Panoptic studio HD captures.
//!
//! Layout of one sequence under the dataset root:
//!
//! ```text
//! <sequence>/calibration_<sequence>.json
//! <sequence>/hdImgs/<cam>/<cam>_<frame:08>.jpg
//! <sequence>/hdImgs/image_coord_<cam>.json
//! <sequence>/hdPose3d_stage1_coco19/body3DScene_<frame:08>.json
//! ```

use crate::camera::{load_panoptic_cameras, Camera};
use crate::dataset::DatasetError;
use crate::geometry::box_from_keypoints;
use crate::sample::{make_sample, ImageCache, JointInfo, Phase, PoseGroup, RawSample, WorkerPool};
use crate::training::PipelineConfig;
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Sequences and frame subsampling per phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PanopticSplits {
    pub train: Vec<String>,
    pub valid: Vec<String>,
    pub test: Vec<String>,
    pub frame_step: [usize; 3],
}

impl Default for PanopticSplits {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        PanopticSplits {
            train: names(&[
                "171204_pose1",
                "171204_pose2",
                "171026_pose1",
                "171026_pose2",
                "171204_pose4",
                "171204_pose5",
                "171204_pose6",
            ]),
            valid: names(&["171204_pose3"]),
            test: names(&["171026_pose3"]),
            frame_step: [10, 10, 50],
        }
    }
}

impl PanopticSplits {
    pub fn sequences(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::Train => &self.train,
            Phase::Valid => &self.valid,
            Phase::Test => &self.test,
        }
    }

    pub fn frame_step(&self, phase: Phase) -> usize {
        match phase {
            Phase::Train => self.frame_step[0],
            Phase::Valid => self.frame_step[1],
            Phase::Test => self.frame_step[2],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageCoordFile {
    start_frame: usize,
    end_frame: usize,
    interval: usize,
    /// One `(joint, [x, y, confidence])` table per annotated frame.
    image_coord: Vec<Vec<[f64; 3]>>,
}

#[derive(Debug, Deserialize)]
struct SkeletonFile {
    bodies: Vec<Body>,
}

#[derive(Debug, Deserialize)]
struct Body {
    joints19: Vec<f64>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.to_path_buf()));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// World pose of the first body, or `None` when nobody is annotated.
/// Joints are stored as `x, y, z, confidence`.
fn load_skeleton(path: &Path) -> Result<Option<Vec<Vector3<f64>>>, DatasetError> {
    let skeleton: SkeletonFile = read_json(path)?;
    let Some(body) = skeleton.bodies.first() else {
        return Ok(None);
    };
    if body.joints19.len() % 4 != 0 {
        return Err(DatasetError::Format(format!(
            "{}: joints19 has {} values",
            path.display(),
            body.joints19.len()
        )));
    }
    Ok(Some(
        body.joints19
            .chunks_exact(4)
            .map(|joint| Vector3::new(joint[0], joint[1], joint[2]))
            .collect(),
    ))
}

fn camera_names(image_root: &Path) -> Result<Vec<String>, DatasetError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(image_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

struct Task {
    raw: RawSample,
    camera: Camera,
    relative_path: String,
}

fn collect_tasks(
    sequence: &str,
    frame_step: usize,
    config: &PipelineConfig,
) -> Result<Vec<Task>, DatasetError> {
    let root = config.root_path.join(sequence);
    let image_root = root.join("hdImgs");
    let names = camera_names(&image_root)?;
    if names.is_empty() {
        return Err(DatasetError::Format(format!(
            "{} holds no camera folders",
            image_root.display()
        )));
    }

    let mut coord_files: HashMap<String, ImageCoordFile> = HashMap::new();
    for name in &names {
        let file = image_root.join(format!("image_coord_{name}.json"));
        coord_files.insert(name.clone(), read_json(&file)?);
    }
    let cameras = load_panoptic_cameras(root.join(format!("calibration_{sequence}.json")), &names)?;

    let first = &coord_files[&names[0]];
    let (start, end, interval) = (first.start_frame, first.end_frame, first.interval.max(1));

    let mut tasks = Vec::new();
    let mut pose_index = 0;
    for frame in (start..end).step_by(interval) {
        let skeleton_path = root
            .join("hdPose3d_stage1_coco19")
            .join(format!("body3DScene_{frame:08}.json"));
        let Some(world_pose) = load_skeleton(&skeleton_path)? else {
            continue;
        };

        if (frame - start) % frame_step == 0 {
            for name in &names {
                let camera = cameras
                    .get(name)
                    .ok_or_else(|| DatasetError::MissingCamera(name.clone()))?;
                let coords = coord_files[name].image_coord.get(pose_index).ok_or_else(|| {
                    DatasetError::Format(format!("image_coord_{name}.json lacks entry {pose_index}"))
                })?;
                let image_coords: Vec<Vector3<f64>> =
                    coords.iter().map(|c| Vector3::new(c[0], c[1], c[2])).collect();
                let Some(bbox) = box_from_keypoints(&image_coords, config.box_margin) else {
                    continue;
                };

                let file_name = format!("{name}_{frame:08}.jpg");
                tasks.push(Task {
                    raw: RawSample {
                        image_path: image_root.join(name).join(&file_name),
                        image_coords,
                        bbox,
                        world_pose: world_pose.clone(),
                    },
                    camera: camera.clone(),
                    relative_path: format!("{sequence}.{name}/{file_name}"),
                });
            }
        }
        pose_index += 1;
    }
    log::info!("Collected {} samples from sequence {sequence}", tasks.len());
    Ok(tasks)
}

/// Builds the pose group of one phase, rendering crops into
/// `config.root_down` on a pool of `config.num_processes` workers.
pub fn build_panoptic_group(
    phase: Phase,
    splits: &PanopticSplits,
    config: &PipelineConfig,
) -> Result<PoseGroup, DatasetError> {
    let cache = ImageCache::new(&config.root_down);
    let params = config.crop_params();

    let mut tasks = Vec::new();
    for sequence in splits.sequences(phase) {
        tasks.extend(collect_tasks(sequence, splits.frame_step(phase).max(1), config)?);
    }

    let pool = WorkerPool::new(config.num_processes)?;
    let samples = pool.run(tasks, |task| {
        make_sample(&task.raw, &task.camera, &params, &cache, &task.relative_path)
    })?;

    Ok(PoseGroup::new(phase, JointInfo::cmu_panoptic()?, samples))
}

/// Where the derived crops of a sequence/camera pair are stored.
pub fn down_folder(config: &PipelineConfig, sequence: &str, camera: &str) -> PathBuf {
    config.root_down.join(format!("{sequence}.{camera}"))
}
