//! Volumetric heatmaps: normalization and soft-argmax decoding.
//!
//! A heatmap has shape `(batch, joint, depth, row, col)` and holds, per
//! `(batch, joint)`, a probability mass over a discretized offset volume.
//! Decoded coordinates have shape `(batch, joint, 3)`.

use crate::camera::Intrinsics;
use ndarray::{s, Array3, Array5, ArrayView2, Axis};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HeatmapError {
    #[error("Expected {expected} values per sample, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Expected {expected} entries for the batch, found {found}")]
    BatchMismatch { expected: usize, found: usize },
    #[error("Mirror permutation has {found} entries for {expected} joints")]
    MirrorMismatch { expected: usize, found: usize },
    #[error("Joint index {index} out of range for {joints} joints")]
    JointIndex { index: usize, joints: usize },
}

/// How the planar (x, y) expectations are scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanarUnits {
    /// Fractions of the output grid times the input side, in input pixels.
    Pixels { side_in: f32 },
    /// The same metric cube as depth: `(fraction - 0.5) * depth_range`.
    Metric,
}

/// Side of the output grid of a network with the given input side and stride.
pub fn output_side(side_in: usize, stride: usize) -> usize {
    (side_in - 1) / stride + 1
}

/// Reshapes raw activations `(batch, joints * depth * rows * cols)` and
/// applies a numerically stable softmax per `(batch, joint)`.
pub fn to_heatmap(
    raw: ArrayView2<f32>,
    depth: usize,
    joints: usize,
    rows: usize,
    cols: usize,
) -> Result<Array5<f32>, HeatmapError> {
    let (batch, values) = raw.dim();
    let expected = joints * depth * rows * cols;
    if values != expected {
        return Err(HeatmapError::ShapeMismatch {
            expected,
            found: values,
        });
    }

    let mut heatmap = Array5::from_shape_vec(
        (batch, joints, depth, rows, cols),
        raw.iter().copied().collect(),
    )
    .map_err(|_| HeatmapError::ShapeMismatch {
        expected,
        found: values,
    })?;

    for mut sample in heatmap.outer_iter_mut() {
        for mut volume in sample.outer_iter_mut() {
            let peak = volume.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            volume.mapv_inplace(|v| (v - peak).exp());
            let total = volume.sum();
            volume.mapv_inplace(|v| v / total);
        }
    }
    Ok(heatmap)
}

/// Expected bin-center fractions `(x, y, z)` in `[0, 1)` per `(batch, joint)`.
fn expected_fractions(heatmap: &Array5<f32>) -> Array3<f32> {
    let (batch, joints, depth, rows, cols) = heatmap.dim();
    let mut fractions = Array3::<f32>::zeros((batch, joints, 3));

    for b in 0..batch {
        for j in 0..joints {
            let volume = heatmap.slice(s![b, j, .., .., ..]);
            let (mut ex, mut ey, mut ez) = (0.0f32, 0.0f32, 0.0f32);
            for ((d, r, c), &p) in volume.indexed_iter() {
                ex += p * (c as f32 + 0.5) / cols as f32;
                ey += p * (r as f32 + 0.5) / rows as f32;
                ez += p * (d as f32 + 0.5) / depth as f32;
            }
            fractions[[b, j, 0]] = ex;
            fractions[[b, j, 1]] = ey;
            fractions[[b, j, 2]] = ez;
        }
    }
    fractions
}

/// Soft-argmax decode.
///
/// Depth fractions map linearly onto `[-depth_range / 2, depth_range / 2]`;
/// planar fractions are scaled according to `units`.
pub fn decode(heatmap: &Array5<f32>, units: PlanarUnits, depth_range: f32) -> Array3<f32> {
    let mut coords = expected_fractions(heatmap);
    for mut joint in coords.rows_mut() {
        match units {
            PlanarUnits::Pixels { side_in } => {
                joint[0] *= side_in;
                joint[1] *= side_in;
            }
            PlanarUnits::Metric => {
                joint[0] = (joint[0] - 0.5) * depth_range;
                joint[1] = (joint[1] - 0.5) * depth_range;
            }
        }
        joint[2] = (joint[2] - 0.5) * depth_range;
    }
    coords
}

/// Semi-cubic decode to camera space.
///
/// Planar coordinates are decoded in input pixels; depth is only trusted
/// relative to the key joint, whose absolute depth is `key_depth[b]`. Each
/// joint is then lifted through the per-sample `intrinsics`.
pub fn to_coordinate(
    heatmap: &Array5<f32>,
    side_in: f32,
    depth_range: f32,
    intrinsics: &[Intrinsics],
    key_depth: &[f32],
    key_index: usize,
) -> Result<Array3<f32>, HeatmapError> {
    let (batch, joints) = (heatmap.len_of(Axis(0)), heatmap.len_of(Axis(1)));
    if key_index >= joints {
        return Err(HeatmapError::JointIndex {
            index: key_index,
            joints,
        });
    }
    for found in [intrinsics.len(), key_depth.len()] {
        if found != batch {
            return Err(HeatmapError::BatchMismatch {
                expected: batch,
                found,
            });
        }
    }

    let mut coords = decode(heatmap, PlanarUnits::Pixels { side_in }, depth_range);
    for (b, mut sample) in coords.outer_iter_mut().enumerate() {
        let k = intrinsics[b];
        let key_z = sample[[key_index, 2]];
        for mut joint in sample.outer_iter_mut() {
            let z = key_depth[b] + (joint[2] - key_z);
            joint[0] = (joint[0] - k.cx as f32) * z / k.fx as f32;
            joint[1] = (joint[1] - k.cy as f32) * z / k.fy as f32;
            joint[2] = z;
        }
    }
    Ok(coords)
}

/// Flip test: averages `heatmap` with the heatmap of the mirrored input,
/// after swapping left/right joints and reversing its columns.
pub fn flip_average(
    heatmap: &Array5<f32>,
    flipped: &Array5<f32>,
    mirror: &[usize],
) -> Result<Array5<f32>, HeatmapError> {
    let joints = heatmap.len_of(Axis(1));
    if mirror.len() != joints {
        return Err(HeatmapError::MirrorMismatch {
            expected: joints,
            found: mirror.len(),
        });
    }
    if let Some(&index) = mirror.iter().find(|&&m| m >= joints) {
        return Err(HeatmapError::JointIndex { index, joints });
    }
    let restored = flipped.select(Axis(1), mirror);
    let restored = restored.slice(s![.., .., .., .., ..;-1]);
    Ok((heatmap + &restored) * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn one_hot(shape: (usize, usize, usize, usize, usize), bins: &[(usize, usize, usize)]) -> Array5<f32> {
        let mut heatmap = Array5::<f32>::zeros(shape);
        for b in 0..shape.0 {
            for (j, &(d, r, c)) in bins.iter().enumerate() {
                heatmap[[b, j, d, r, c]] = 1.0;
            }
        }
        heatmap
    }

    #[test]
    fn test_softmax_normalizes_each_joint() {
        let raw = Array2::from_shape_fn((2, 3 * 4 * 5 * 5), |(b, i)| {
            (i as f32 * 0.37).sin() * 50.0 + b as f32 * 1000.0
        });
        let heatmap = to_heatmap(raw.view(), 4, 3, 5, 5).unwrap();
        assert_eq!(heatmap.dim(), (2, 3, 4, 5, 5));
        for sample in heatmap.outer_iter() {
            for volume in sample.outer_iter() {
                assert_relative_eq!(volume.sum(), 1.0, epsilon = 1e-5);
                assert!(volume.iter().all(|v| v.is_finite() && *v >= 0.0));
            }
        }
    }

    #[test]
    fn test_to_heatmap_checks_shape() {
        let raw = Array2::<f32>::zeros((1, 10));
        assert_eq!(
            to_heatmap(raw.view(), 2, 1, 2, 2),
            Err(HeatmapError::ShapeMismatch {
                expected: 8,
                found: 10
            })
        );
    }

    #[test]
    fn test_one_hot_decodes_to_bin_center() {
        let heatmap = one_hot((1, 2, 16, 17, 17), &[(3, 5, 7), (15, 0, 16)]);
        let coords = decode(&heatmap, PlanarUnits::Pixels { side_in: 257.0 }, 100.0);

        assert_relative_eq!(coords[[0, 0, 0]], 7.5 / 17.0 * 257.0, epsilon = 1e-3);
        assert_relative_eq!(coords[[0, 0, 1]], 5.5 / 17.0 * 257.0, epsilon = 1e-3);
        assert_relative_eq!(coords[[0, 0, 2]], (3.5 / 16.0 - 0.5) * 100.0, epsilon = 1e-4);
        assert_relative_eq!(coords[[0, 1, 0]], 16.5 / 17.0 * 257.0, epsilon = 1e-3);
        assert_relative_eq!(coords[[0, 1, 2]], (15.5 / 16.0 - 0.5) * 100.0, epsilon = 1e-4);

        let metric = decode(&heatmap, PlanarUnits::Metric, 100.0);
        assert_relative_eq!(metric[[0, 0, 0]], (7.5 / 17.0 - 0.5) * 100.0, epsilon = 1e-4);
        assert_relative_eq!(metric[[0, 0, 2]], coords[[0, 0, 2]], epsilon = 1e-6);
    }

    #[test]
    fn test_uniform_heatmap_decodes_to_volume_center() {
        let heatmap = Array5::<f32>::from_elem((1, 1, 4, 3, 3), 1.0 / 36.0);
        let coords = decode(&heatmap, PlanarUnits::Metric, 80.0);
        for axis in 0..3 {
            assert_relative_eq!(coords[[0, 0, axis]], 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_semi_cubic_lifts_through_intrinsics() {
        let heatmap = one_hot((1, 2, 8, 9, 9), &[(4, 4, 4), (6, 2, 7)]);
        let intrinsics = Intrinsics {
            fx: 300.0,
            fy: 300.0,
            cx: 64.0,
            cy: 64.0,
        };
        let coords = to_coordinate(&heatmap, 128.0, 80.0, &[intrinsics], &[2500.0], 0).unwrap();

        // key joint sits at the given depth
        assert_relative_eq!(coords[[0, 0, 2]], 2500.0, epsilon = 1e-2);
        // depth offsets are kept relative to the key joint: two bins of 10
        assert_relative_eq!(coords[[0, 1, 2]], 2520.0, epsilon = 1e-2);

        let u = 7.5 / 9.0 * 128.0;
        let v = 2.5 / 9.0 * 128.0;
        assert_relative_eq!(coords[[0, 1, 0]], (u - 64.0) * 2520.0 / 300.0, epsilon = 1e-1);
        assert_relative_eq!(coords[[0, 1, 1]], (v - 64.0) * 2520.0 / 300.0, epsilon = 1e-1);

        assert!(to_coordinate(&heatmap, 128.0, 80.0, &[], &[2500.0], 0).is_err());
    }

    #[test]
    fn test_flip_average_of_consistent_views() {
        // joint 1 and 2 are a left/right pair
        let mirror = [0, 2, 1];
        let heatmap = one_hot((1, 3, 2, 4, 6), &[(0, 1, 2), (1, 3, 0), (1, 0, 5)]);
        // the mirrored input swaps the pair and reverses the columns
        let flipped = one_hot((1, 3, 2, 4, 6), &[(0, 1, 3), (1, 0, 0), (1, 3, 5)]);

        let averaged = flip_average(&heatmap, &flipped, &mirror).unwrap();
        assert_eq!(averaged, heatmap);
        assert!(flip_average(&heatmap, &flipped, &[0, 1]).is_err());
        assert!(matches!(
            flip_average(&heatmap, &flipped, &[0, 2, 3]),
            Err(HeatmapError::JointIndex { index: 3, joints: 3 })
        ));
    }

    #[test]
    fn test_semi_cubic_rejects_unknown_key_joint() {
        let heatmap = Array5::<f32>::zeros((1, 2, 4, 4, 4));
        let intrinsics = Intrinsics {
            fx: 1.0,
            fy: 1.0,
            cx: 2.0,
            cy: 2.0,
        };
        let result = to_coordinate(&heatmap, 4.0, 2.0, &[intrinsics], &[3.0], 5);
        assert!(matches!(
            result,
            Err(HeatmapError::JointIndex { index: 5, joints: 2 })
        ));
    }
}
