//! Depth-sensor video captures (color + depth rigs).
//!
//! Annotations arrive as [`RawDepthSample`]s, one per person and frame.
//! Each video is decoded once; annotated frames are run through the person
//! detector, the annotated boxes are replaced by their matched detections
//! and the survivors are cropped with [`make_depth_sample`]. The depth
//! frame behind every kept sample is stored once in the derived-image
//! cache.

use crate::camera::{load_camera_map, Camera};
use crate::dataset::{DatasetError, DepthImage};
use crate::sample::{
    make_depth_sample, match_detections, DepthSample, ImageCache, JointInfo, Phase,
    PersonDetector, PoseGroup, RawDepthSample, WorkerPool,
};
use crate::training::PipelineConfig;
use image::{DynamicImage, RgbImage};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Paired color and depth cameras of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthRig {
    pub color: Camera,
    pub depth: Camera,
}

impl DepthRig {
    /// Reads a camera map holding a `color` and a `depth` entry.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let mut cameras = load_camera_map(path)?;
        let mut take = |name: &str| {
            cameras
                .remove(name)
                .ok_or_else(|| DatasetError::MissingCamera(name.to_string()))
        };
        Ok(DepthRig {
            color: take("color")?,
            depth: take("depth")?,
        })
    }
}

/// Sensor id embedded in an NTU-style video name (`S001C002P003R002A013`
/// belongs to rig `C002`).
pub fn ntu_rig_key(video: &str) -> String {
    video.get(4..8).unwrap_or(video).to_string()
}

/// Performer id of an NTU-style video name (`P003`).
pub fn ntu_person_key(video: &str) -> String {
    video.get(8..12).unwrap_or(video).to_string()
}

/// Raw depth frame of an NTU-style capture:
/// `<root>/nturgbd_depth_s<setup>/nturgb+d_depth/<video>/Depth-<frame+1:08>.png`.
pub fn ntu_depth_frame(root: &Path, video: &str, frame: usize) -> PathBuf {
    let setup = video.get(1..4).unwrap_or("000");
    root.join(format!("nturgbd_depth_s{setup}"))
        .join("nturgb+d_depth")
        .join(video)
        .join(format!("Depth-{:08}.png", frame + 1))
}

/// One decoded frame of a capture.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub color: RgbImage,
    pub depth: Option<DepthImage>,
}

pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<VideoFrame, DatasetError>> + 'a>;

/// Decodes the frames of a video in order.
pub trait FrameSource: Send + Sync {
    fn frames(&self, video: &str) -> Result<FrameIter<'_>, DatasetError>;
}

/// Videos stored as directories of numbered still images,
/// `<root>/<video>/<frame>.{jpg,png}`, ordered by file name.
///
/// With a depth root, frame `i` is paired with the NTU depth frame
/// [`ntu_depth_frame`]`(depth_root, video, i)`.
#[derive(Debug, Clone)]
pub struct ImageDirectoryFrames {
    root: PathBuf,
    depth_root: Option<PathBuf>,
}

impl ImageDirectoryFrames {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        ImageDirectoryFrames {
            root: root.as_ref().to_path_buf(),
            depth_root: None,
        }
    }

    pub fn with_ntu_depth<P: AsRef<Path>>(mut self, depth_root: P) -> Self {
        self.depth_root = Some(depth_root.as_ref().to_path_buf());
        self
    }

    fn depth_frame(&self, video: &str, index: usize) -> Result<Option<DepthImage>, DatasetError> {
        let Some(root) = &self.depth_root else {
            return Ok(None);
        };
        let path = ntu_depth_frame(root, video, index);
        if !path.is_file() {
            return Err(DatasetError::MissingFile(path));
        }
        Ok(Some(image::open(path)?.to_luma16()))
    }
}

impl FrameSource for ImageDirectoryFrames {
    fn frames(&self, video: &str) -> Result<FrameIter<'_>, DatasetError> {
        let folder = self.root.join(video);
        if !folder.is_dir() {
            return Err(DatasetError::MissingFile(folder));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("jpg" | "jpeg" | "png")
                )
            })
            .collect();
        files.sort();
        let video = video.to_string();
        Ok(Box::new(files.into_iter().enumerate().map(
            move |(index, path)| {
                Ok(VideoFrame {
                    color: image::open(path)?.to_rgb8(),
                    depth: self.depth_frame(&video, index)?,
                })
            },
        )))
    }
}

/// Reads a JSON list of video names to leave out.
pub fn load_exclusions<P: AsRef<Path>>(path: P) -> Result<HashSet<String>, DatasetError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Performers assigned to each phase.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersonSplit {
    pub train: Vec<String>,
    pub valid: Vec<String>,
    pub test: Vec<String>,
}

impl PersonSplit {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn persons(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::Train => &self.train,
            Phase::Valid => &self.valid,
            Phase::Test => &self.test,
        }
    }

    /// Keeps the samples whose performer belongs to the group's phase.
    pub fn select<K>(&self, mut group: PoseGroup<DepthSample>, person_key: K) -> PoseGroup<DepthSample>
    where
        K: Fn(&str) -> String,
    {
        let persons: HashSet<&str> = self.persons(group.phase).iter().map(String::as_str).collect();
        let before = group.samples.len();
        group
            .samples
            .retain(|sample| persons.contains(person_key(&sample.video).as_str()));
        log::info!(
            "Kept {} of {before} {} samples by performer",
            group.samples.len(),
            group.phase
        );
        group
    }
}

fn process_video(
    video: &str,
    annotations: Vec<RawDepthSample>,
    rig: &DepthRig,
    detector: &dyn PersonDetector,
    frames: &dyn FrameSource,
    config: &PipelineConfig,
    cache: &ImageCache,
) -> Result<Vec<DepthSample>, DatasetError> {
    let mut by_frame: BTreeMap<usize, Vec<RawDepthSample>> = BTreeMap::new();
    for sample in annotations {
        by_frame.entry(sample.frame).or_default().push(sample);
    }
    let params = config.crop_params();

    let mut samples = Vec::new();
    for (index, frame) in frames.frames(video)?.enumerate() {
        let Some(people) = by_frame.remove(&index) else {
            if by_frame.is_empty() {
                break;
            }
            continue;
        };
        let frame = frame?;
        let detections = detector.detect(&frame.color)?;

        let mut kept = Vec::new();
        for raw in match_detections(people, &detections, config.iou_floor) {
            if let Some(sample) =
                make_depth_sample(&raw, &frame.color, &rig.color, &rig.depth, &params, cache)?
            {
                kept.push(sample);
            }
        }
        match &frame.depth {
            Some(depth) if !kept.is_empty() => {
                let depth_path = cache.path(format!("depth/{video}/{index}.png"));
                cache.write_once(&depth_path, || Ok(DynamicImage::ImageLuma16(depth.clone())))?;
                for sample in &mut kept {
                    sample.depth_path = Some(depth_path.clone());
                }
            }
            _ => {}
        }
        samples.extend(kept);
    }
    if !by_frame.is_empty() {
        log::warn!(
            "Video {video} ended before {} annotated frame(s)",
            by_frame.len()
        );
    }
    Ok(samples)
}

/// Builds the depth-sample group of one phase.
///
/// Videos listed in `exclusions` are skipped. The others are processed in
/// parallel on `config.num_processes` workers; samples come out ordered by
/// video name, then frame. `rig_key` maps a video name to its entry in
/// `rigs`.
#[allow(clippy::too_many_arguments)]
pub fn build_depth_group<K>(
    phase: Phase,
    annotations: Vec<RawDepthSample>,
    exclusions: &HashSet<String>,
    rigs: &HashMap<String, DepthRig>,
    rig_key: K,
    detector: &dyn PersonDetector,
    frames: &dyn FrameSource,
    config: &PipelineConfig,
) -> Result<PoseGroup<DepthSample>, DatasetError>
where
    K: Fn(&str) -> String,
{
    let mut by_video: BTreeMap<String, Vec<RawDepthSample>> = BTreeMap::new();
    for sample in annotations {
        by_video.entry(sample.video.clone()).or_default().push(sample);
    }
    by_video.retain(|video, _| !exclusions.contains(video));

    let mut tasks = Vec::with_capacity(by_video.len());
    for (video, samples) in by_video {
        let key = rig_key(&video);
        let rig = rigs.get(&key).ok_or(DatasetError::MissingCamera(key))?;
        tasks.push((video, samples, rig));
    }

    let cache = ImageCache::new(&config.root_down);
    let pool = WorkerPool::new(config.num_processes)?;
    let per_video = pool.run(tasks, |(video, samples, rig)| {
        process_video(&video, samples, rig, detector, frames, config, &cache).map(Some)
    })?;

    let samples: Vec<DepthSample> = per_video.into_iter().flatten().collect();
    log::info!("Built {} {phase} depth samples", samples.len());
    Ok(PoseGroup::new(phase, JointInfo::kinect()?, samples))
}
