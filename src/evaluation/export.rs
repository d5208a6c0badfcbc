//! CSV export of decoded predictions.

use crate::evaluation::EvaluationError;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub batch: usize,
    pub sample: usize,
    pub joint: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Streams predictions of consecutive batches into one CSV file.
pub struct PredictionWriter {
    writer: csv::Writer<File>,
}

impl PredictionWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, EvaluationError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(PredictionWriter {
            writer: csv::Writer::from_path(path)?,
        })
    }

    /// Writes a `(batch, joint, 3)` block of predictions.
    pub fn write_batch(
        &mut self,
        batch: usize,
        coords: ArrayView3<f32>,
    ) -> Result<(), EvaluationError> {
        if coords.dim().2 != 3 {
            return Err(EvaluationError::ShapeMismatch(format!(
                "Expected (batch, joint, 3) predictions, found {:?}",
                coords.dim()
            )));
        }
        for (sample, joints) in coords.outer_iter().enumerate() {
            for (joint, xyz) in joints.outer_iter().enumerate() {
                self.writer.serialize(PredictionRow {
                    batch,
                    sample,
                    joint,
                    x: xyz[0],
                    y: xyz[1],
                    z: xyz[2],
                })?;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), EvaluationError> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn read_predictions<P: AsRef<Path>>(path: P) -> Result<Vec<PredictionRow>, EvaluationError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<PredictionRow>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_batches_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last/predictions.csv");

        let mut writer = PredictionWriter::create(&path).unwrap();
        let first = Array3::from_shape_fn((2, 2, 3), |(b, j, k)| (b * 10 + j * 3 + k) as f32);
        let second = Array3::from_elem((1, 2, 3), -1.5f32);
        writer.write_batch(0, first.view()).unwrap();
        writer.write_batch(1, second.view()).unwrap();
        writer.finish().unwrap();

        let rows = read_predictions(&path).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(
            rows[3],
            PredictionRow {
                batch: 0,
                sample: 1,
                joint: 1,
                x: 13.0,
                y: 14.0,
                z: 15.0
            }
        );
        assert_eq!(rows[5].batch, 1);
        assert_eq!(rows[5].z, -1.5);

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("batch,sample,joint,x,y,z"));
    }
}
