//! Photometric augmentations and depth-value encodings of synthesized
//! inputs.
//!
//! Every random draw goes through the caller's [`Rng`], so a seeded
//! generator reproduces the same inputs.

use crate::camera::{Camera, CameraError};
use crate::dataset::{DatasetError, DepthImage};
use image::imageops::{self, FilterType};
use image::{Luma, Rgb, RgbImage, RgbaImage};
use nalgebra::Vector2;
use ndarray::Array2;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw depth units (millimetres) per metre.
pub const DEPTH_SCALE: f32 = 1000.0;

fn luminance(c: &[f32; 3]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

/// Brightness, saturation and contrast changes of one color input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorJitter {
    /// Added to every channel, in 8-bit units.
    pub brightness: f32,
    /// Scales the distance of each channel from the pixel's gray value.
    pub saturation: f32,
    /// Scales the distance of each pixel from the mean luminance.
    pub contrast: f32,
}

impl ColorJitter {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        ColorJitter {
            brightness: rng.random_range(-32.0..=32.0),
            saturation: rng.random_range(0.5..=1.5),
            contrast: rng.random_range(0.5..=1.5),
        }
    }

    pub fn apply(&self, image: &mut RgbImage) {
        let count = (image.width() * image.height()).max(1) as f32;
        let mean = image
            .pixels()
            .map(|p| luminance(&p.0.map(f32::from)))
            .sum::<f32>()
            / count
            + self.brightness;

        for pixel in image.pixels_mut() {
            let mut channels = pixel.0.map(|v| f32::from(v) + self.brightness);
            let gray = luminance(&channels);
            for value in channels.iter_mut() {
                *value = gray + (*value - gray) * self.saturation;
                *value = mean + (*value - mean) * self.contrast;
            }
            *pixel = Rgb(channels.map(|v| v.round().clamp(0.0, 255.0) as u8));
        }
    }
}

/// Converts per-pixel distances along the viewing ray of `camera` into
/// depth along its optical axis. Zero (missing) readings stay zero.
pub fn range_to_depth(range: &DepthImage, camera: &Camera) -> Result<DepthImage, CameraError> {
    let mut depth = DepthImage::new(range.width(), range.height());
    for (x, y, value) in range.enumerate_pixels() {
        if value[0] == 0 {
            continue;
        }
        let ray = camera.image_to_camera(&Vector2::new(x as f64, y as f64), 1.0)?;
        let z = f64::from(value[0]) / ray.norm();
        depth.put_pixel(x, y, Luma([z.round() as u16]));
    }
    Ok(depth)
}

/// Network encoding of a raw depth image, `(rows, cols)` in metres, or
/// `exp(-metres)` with `nexponent`. Missing readings encode as zero.
pub fn enhance_depth(depth: &DepthImage, nexponent: bool) -> Array2<f32> {
    let (width, height) = depth.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
        let raw = depth.get_pixel(col as u32, row as u32)[0];
        if raw == 0 {
            return 0.0;
        }
        let metres = f32::from(raw) / DEPTH_SCALE;
        if nexponent {
            (-metres).exp()
        } else {
            metres
        }
    })
}

/// Object cut-outs (RGBA, transparent background) pasted over training
/// inputs.
#[derive(Debug, Clone, Default)]
pub struct Occluders {
    patches: Vec<RgbaImage>,
}

impl Occluders {
    /// Loads every PNG in `folder`, ordered by file name.
    pub fn load<P: AsRef<Path>>(folder: P) -> Result<Self, DatasetError> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Err(DatasetError::MissingFile(folder.to_path_buf()));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect();
        files.sort();

        let patches = files
            .iter()
            .map(|path| Ok(image::open(path)?.to_rgba8()))
            .collect::<Result<Vec<_>, DatasetError>>()?;
        log::info!("Loaded {} occluders from {}", patches.len(), folder.display());
        Ok(Occluders { patches })
    }

    pub fn from_patches(patches: Vec<RgbaImage>) -> Self {
        Occluders { patches }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Alpha-blends a random occluder, resized so that its longer side
    /// spans 20% to 50% of the shorter image side, centered on a random
    /// pixel of `image`.
    pub fn paste<R: Rng + ?Sized>(&self, image: &mut RgbImage, rng: &mut R) {
        if self.patches.is_empty() || image.width() == 0 || image.height() == 0 {
            return;
        }
        let patch = &self.patches[rng.random_range(0..self.patches.len())];
        let (patch_w, patch_h) = patch.dimensions();
        if patch_w == 0 || patch_h == 0 {
            return;
        }

        let side = image.width().min(image.height()) as f64;
        let scale = rng.random_range(0.2..=0.5) * side / patch_w.max(patch_h) as f64;
        let width = ((patch_w as f64 * scale).round() as u32).max(1);
        let height = ((patch_h as f64 * scale).round() as u32).max(1);
        let resized = imageops::resize(patch, width, height, FilterType::Triangle);

        let center_x = rng.random_range(0..image.width()) as i64;
        let center_y = rng.random_range(0..image.height()) as i64;
        let left = center_x - i64::from(width / 2);
        let top = center_y - i64::from(height / 2);

        for (x, y, occluder) in resized.enumerate_pixels() {
            let (tx, ty) = (left + i64::from(x), top + i64::from(y));
            if tx < 0 || ty < 0 || tx >= i64::from(image.width()) || ty >= i64::from(image.height()) {
                continue;
            }
            let alpha = f32::from(occluder[3]) / 255.0;
            let target = image.get_pixel_mut(tx as u32, ty as u32);
            for c in 0..3 {
                let blended =
                    alpha * f32::from(occluder[c]) + (1.0 - alpha) * f32::from(target[c]);
                target[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
