//! Image warping between two cameras that share an optical center.

use crate::camera::{Camera, CameraError, Resolution, CALIBRATION_DEPTH};
use image::{ImageBuffer, Pixel, Primitive};
use nalgebra::{Matrix3, Vector2, Vector3};

/// Channel types that can be bilinearly interpolated.
pub trait PixelSample: Primitive {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl PixelSample for u8 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

impl PixelSample for u16 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

impl PixelSample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Renders what `destination` would see, given `image` as seen by `source`.
///
/// Every output pixel is lifted to a ray of `destination`, rotated into the
/// frame of `source`, projected (with distortion) and bilinearly sampled.
/// Samples that fall outside the source image stay black. When neither
/// camera carries distortion the per-pixel mapping collapses to the
/// homography `K_src · R_src · R_dstᵀ · K_dst⁻¹`.
///
/// # Errors
///
/// * [`CameraError::OpticalCenterMismatch`] if the cameras have different
///   optical centers.
/// * [`CameraError::NumericalError`] if the destination intrinsics are singular.
pub fn reproject_image<P>(
    image: &Image<P>,
    source: &Camera,
    destination: &Camera,
    size: Resolution,
) -> Result<Image<P>, CameraError>
where
    P: Pixel,
    P::Subpixel: PixelSample,
{
    if !source.shares_optical_center(destination) {
        return Err(CameraError::OpticalCenterMismatch);
    }

    let relative: Matrix3<f64> = source.rotation() * destination.rotation().transpose();
    let homography = if source.distortion().is_none() && destination.distortion().is_none() {
        let inverse = destination.intrinsic_matrix().try_inverse().ok_or_else(|| {
            CameraError::NumericalError("Destination intrinsics are singular".to_string())
        })?;
        Some(source.intrinsic_matrix() * relative * inverse)
    } else {
        None
    };

    let mut output = Image::<P>::new(size.width, size.height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let target = Vector2::new(x as f64, y as f64);
        let sampled_at = match &homography {
            Some(h) => {
                let p = h * Vector3::new(target.x, target.y, 1.0);
                if p.z <= f64::EPSILON {
                    continue;
                }
                Vector2::new(p.x / p.z, p.y / p.z)
            }
            None => {
                // far outside the calibrated field of view the undistortion
                // may not converge; such pixels stay black
                let Ok(ray) = destination.image_to_camera(&target, CALIBRATION_DEPTH) else {
                    continue;
                };
                match source.camera_to_image(&(relative * ray)) {
                    Ok(p) => p,
                    Err(CameraError::PointBehindCamera) => continue,
                    Err(e) => return Err(e),
                }
            }
        };
        if let Some(value) = bilinear_sample(image, &sampled_at) {
            *pixel = value;
        }
    }
    Ok(output)
}

fn bilinear_sample<P>(image: &Image<P>, point: &Vector2<f64>) -> Option<P>
where
    P: Pixel,
    P::Subpixel: PixelSample,
{
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    const TOLERANCE: f64 = 1e-6;
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    if !(point.x >= -TOLERANCE
        && point.y >= -TOLERANCE
        && point.x <= max_x + TOLERANCE
        && point.y <= max_y + TOLERANCE)
    {
        return None;
    }
    let px = point.x.clamp(0.0, max_x);
    let py = point.y.clamp(0.0, max_y);

    let x0 = px.floor() as u32;
    let y0 = py.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (px - x0 as f64) as f32;
    let fy = (py - y0 as f64) as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut result = *p00;
    for (c, value) in result.channels_mut().iter_mut().enumerate() {
        let top = p00.channels()[c].to_f32() * (1.0 - fx) + p10.channels()[c].to_f32() * fx;
        let bottom = p01.channels()[c].to_f32() * (1.0 - fx) + p11.channels()[c].to_f32() * fx;
        *value = P::Subpixel::from_f32(top * (1.0 - fy) + bottom * fy);
    }
    Some(result)
}
