//! Shared fixtures for unit tests.

use crate::camera::{Camera, RadTan, Resolution};
use nalgebra::{Matrix3, Rotation3, Vector3};

/// A distorted HD camera looking roughly along +z from `z = -280`.
pub(crate) fn test_camera() -> Camera {
    let rotation = Rotation3::from_euler_angles(0.1, -0.2, 0.05).into_inner();
    let intrinsic = Matrix3::new(1395.0, 0.0, 951.0, 0.0, 1392.0, 545.0, 0.0, 0.0, 1.0);
    Camera::new(
        rotation,
        Vector3::new(10.0, -150.0, -280.0),
        intrinsic,
        Some(RadTan {
            coefficients: [-0.27, 0.2, 0.0003, -0.0002, -0.06],
        }),
        Resolution {
            width: 1920,
            height: 1080,
        },
    )
    .unwrap()
}

/// An axis-aligned, distortion-free camera at the world origin.
pub(crate) fn simple_camera(width: u32, height: u32, focal: f64) -> Camera {
    let intrinsic = Matrix3::new(
        focal,
        0.0,
        (width as f64 - 1.0) / 2.0,
        0.0,
        focal,
        (height as f64 - 1.0) / 2.0,
        0.0,
        0.0,
        1.0,
    );
    Camera::new(
        Matrix3::identity(),
        Vector3::zeros(),
        intrinsic,
        None,
        Resolution { width, height },
    )
    .unwrap()
}
