//! Radial-tangential (OpenCV 5-coefficient) lens distortion.
//!
//! Coefficients are stored in the calibration order `[k1, k2, p1, p2, k3]`
//! and act on normalized image coordinates (`x / z`, `y / z`).

use crate::camera::CameraError;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// The five radial-tangential coefficients `[k1, k2, p1, p2, k3]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadTan {
    pub coefficients: [f64; 5],
}

impl RadTan {
    /// Builds the model from a calibration vector.
    ///
    /// Calibration files carry either 4 (`k3` omitted) or 5 coefficients.
    /// Returns `Ok(None)` when every coefficient is zero, so that an all-zero
    /// vector is treated as "no distortion model".
    pub fn from_slice(values: &[f64]) -> Result<Option<Self>, CameraError> {
        let mut coefficients = [0.0; 5];
        match values.len() {
            0 => return Ok(None),
            4 | 5 => coefficients[..values.len()].copy_from_slice(values),
            n => {
                return Err(CameraError::InvalidParams(format!(
                    "Expected 4 or 5 distortion coefficients, found {n}"
                )))
            }
        }
        if coefficients.iter().all(|c| *c == 0.0) {
            return Ok(None);
        }
        Ok(Some(RadTan { coefficients }))
    }

    /// Applies the distortion to a normalized image point.
    pub fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3] = self.coefficients;
        let x = point.x;
        let y = point.y;

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// The model seen through a camera whose x-axis is negated: only the
    /// tangential `p2` term changes sign.
    pub fn mirrored(&self) -> Self {
        let mut coefficients = self.coefficients;
        coefficients[3] = -coefficients[3];
        RadTan { coefficients }
    }

    /// Inverts [`RadTan::distort`] with Newton iterations on the analytic Jacobian.
    ///
    /// The initial guess is the distorted point itself.
    ///
    /// # Errors
    ///
    /// * [`CameraError::NumericalError`] if the Jacobian becomes singular or the
    ///   iteration does not converge.
    pub fn undistort(&self, distorted: &Vector2<f64>) -> Result<Vector2<f64>, CameraError> {
        const EPS: f64 = 1e-10;
        const MAX_ITERATIONS: u32 = 100;

        let [k1, k2, p1, p2, k3] = self.coefficients;
        let mut point = *distorted;

        for _ in 0..MAX_ITERATIONS {
            let error = self.distort(&point) - distorted;
            if error.norm() < EPS {
                return Ok(point);
            }

            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r4 * r2;

            // d(radial)/d(r2), chained with d(r2)/dx = 2x and d(r2)/dy = 2y
            let d_radial = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
            let d_radial_dx = d_radial * 2.0 * x;
            let d_radial_dy = d_radial * 2.0 * y;

            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + 6.0 * p2 * x;
            let j01 = x * d_radial_dy + 2.0 * p1 * x + 2.0 * p2 * y;
            let j10 = y * d_radial_dx + 2.0 * p1 * x + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + 6.0 * p1 * y + 2.0 * p2 * x;

            let inv_jacobian = Matrix2::new(j00, j01, j10, j11)
                .try_inverse()
                .ok_or_else(|| CameraError::NumericalError("Jacobian is singular".to_string()))?;

            let delta = inv_jacobian * error;
            point -= delta;

            if delta.norm() < EPS {
                return Ok(point);
            }
        }

        Err(CameraError::NumericalError(format!(
            "Undistortion did not converge after {MAX_ITERATIONS} iterations"
        )))
    }
}
