//! Minimum-cost bipartite assignment and detector box matching.

use crate::geometry::BoundingBox;
use ndarray::Array2;

/// Solves the linear assignment problem with the O(n³) potential-based
/// Hungarian algorithm.
///
/// Returns `(row, col)` pairs of a minimum-cost matching sorted by row.
/// Rectangular matrices are padded with zero-cost dummy rows or columns,
/// so exactly `min(rows, cols)` pairs are returned.
pub fn hungarian_assignment(cost: &Array2<f64>) -> Vec<(usize, usize)> {
    let (n_rows, n_cols) = cost.dim();
    if n_rows == 0 || n_cols == 0 {
        return Vec::new();
    }

    let n = n_rows.max(n_cols);
    let mut c = Array2::<f64>::zeros((n, n));
    c.slice_mut(ndarray::s![..n_rows, ..n_cols]).assign(cost);

    // 1-indexed potentials; column 0 is the virtual source
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // p[j]: row matched to column j (0 = free)
    let mut p = vec![0_usize; n + 1];
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = c[[i0 - 1, j - 1]] - u[i0] - v[j];
                if reduced < min_val[j] {
                    min_val[j] = reduced;
                    way[j] = j0;
                }
                if min_val[j] < delta {
                    delta = min_val[j];
                    j1 = j;
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let previous = way[j0];
            p[j0] = p[previous];
            j0 = previous;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignments: Vec<(usize, usize)> = (1..=n)
        .filter(|&j| p[j] != 0 && p[j] - 1 < n_rows && j - 1 < n_cols)
        .map(|j| (p[j] - 1, j - 1))
        .collect();
    assignments.sort_unstable_by_key(|&(row, _)| row);
    assignments
}

/// Pairs known boxes with detections so that the total IoU is maximal,
/// keeping only pairs whose IoU reaches `iou_floor`.
///
/// Returns `(known_index, detected_index)` pairs sorted by known index.
/// Known boxes without an accepted partner are absent from the result.
pub fn match_boxes(
    known: &[BoundingBox],
    detected: &[BoundingBox],
    iou_floor: f64,
) -> Vec<(usize, usize)> {
    let ious = Array2::from_shape_fn((known.len(), detected.len()), |(i, j)| {
        known[i].iou(&detected[j])
    });
    let costs = ious.mapv(|iou| -iou);

    hungarian_assignment(&costs)
        .into_iter()
        .filter(|&(i, j)| ious[[i, j]] >= iou_floor)
        .collect()
}
