//! Model and criterion selection by tag.

use crate::training::{PipelineConfig, TrainingError};
use ndarray::{Array2, Array4, ArrayView2, ArrayView3, ArrayView4, Zip};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Output of one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Raw heatmap activations, `(batch, joints * depth * rows * cols)`.
    pub activations: Array2<f32>,
    /// Last feature map `(batch, channel, row, col)`, when the model
    /// exposes it for distillation.
    pub features: Option<Array4<f32>>,
}

/// A pose network taking `(batch, channel, side_in, side_in)` inputs.
pub trait PoseModel: Send {
    fn forward(&mut self, input: ArrayView4<f32>) -> Result<ModelOutput, TrainingError>;
}

pub type ModelFactory = fn(&PipelineConfig) -> Result<Box<dyn PoseModel>, TrainingError>;

/// Maps model tags to constructors.
#[derive(Default)]
pub struct ModelRegistry {
    factories: BTreeMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Registers `factory` under `tag`, replacing any previous entry.
    pub fn register(&mut self, tag: &str, factory: ModelFactory) -> &mut Self {
        if self.factories.insert(tag.to_string(), factory).is_some() {
            log::warn!("Model tag '{tag}' registered twice");
        }
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the model named by `config.model`.
    pub fn create(&self, config: &PipelineConfig) -> Result<Box<dyn PoseModel>, TrainingError> {
        let factory = self
            .factories
            .get(&config.model)
            .ok_or_else(|| TrainingError::UnknownModel(config.model.clone()))?;
        log::info!("Creating model '{}'", config.model);
        factory(config)
    }
}

/// Coordinate regression loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    L1,
    Mse,
    SmoothL1,
}

impl FromStr for Criterion {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Ok(Criterion::L1),
            "mse" | "l2" => Ok(Criterion::Mse),
            "smoothl1" | "smooth_l1" => Ok(Criterion::SmoothL1),
            _ => Err(TrainingError::UnknownCriterion(s.to_string())),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::L1 => "L1",
            Criterion::Mse => "MSE",
            Criterion::SmoothL1 => "SmoothL1",
        };
        f.write_str(name)
    }
}

impl Criterion {
    fn element(&self, diff: f32) -> f32 {
        match self {
            Criterion::L1 => diff.abs(),
            Criterion::Mse => diff * diff,
            Criterion::SmoothL1 if diff.abs() < 1.0 => 0.5 * diff * diff,
            Criterion::SmoothL1 => diff.abs() - 0.5,
        }
    }

    /// Mean loss over the coordinates of valid joints; zero when no joint
    /// is valid.
    pub fn loss(
        &self,
        prediction: ArrayView3<f32>,
        truth: ArrayView3<f32>,
        valid: ArrayView2<bool>,
    ) -> Result<f32, TrainingError> {
        let (batch, joints, dims) = prediction.dim();
        if truth.dim() != prediction.dim() || valid.dim() != (batch, joints) {
            return Err(TrainingError::Shape(format!(
                "prediction {:?}, truth {:?}, valid {:?}",
                prediction.dim(),
                truth.dim(),
                valid.dim()
            )));
        }

        let mut total = 0.0f32;
        let mut count = 0usize;
        Zip::from(prediction.rows())
            .and(truth.rows())
            .and(&valid)
            .for_each(|p, t, &ok| {
                if ok {
                    total += p.iter().zip(t.iter()).map(|(a, b)| self.element(a - b)).sum::<f32>();
                    count += dims;
                }
            });
        Ok(if count == 0 { 0.0 } else { total / count as f32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, Array3};

    struct ConstantModel {
        outputs: usize,
    }

    impl PoseModel for ConstantModel {
        fn forward(&mut self, input: ArrayView4<f32>) -> Result<ModelOutput, TrainingError> {
            Ok(ModelOutput {
                activations: Array2::zeros((input.len_of(ndarray::Axis(0)), self.outputs)),
                features: None,
            })
        }
    }

    fn constant(config: &PipelineConfig) -> Result<Box<dyn PoseModel>, TrainingError> {
        Ok(Box::new(ConstantModel {
            outputs: config.num_joints * config.depth * config.side_out() * config.side_out(),
        }))
    }

    #[test]
    fn test_registry() {
        let mut registry = ModelRegistry::new();
        registry.register("constant", constant);
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec!["constant"]);

        let config = PipelineConfig {
            model: "constant".to_string(),
            side_in: 33,
            ..PipelineConfig::default()
        };
        let mut model = registry.create(&config).unwrap();
        let output = model.forward(Array4::zeros((2, 3, 33, 33)).view()).unwrap();
        assert_eq!(output.activations.dim(), (2, 19 * 16 * 3 * 3));

        let missing = PipelineConfig {
            model: "hourglass".to_string(),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            registry.create(&missing),
            Err(TrainingError::UnknownModel(tag)) if tag == "hourglass"
        ));
    }

    #[test]
    fn test_parse_criterion() {
        assert_eq!("SmoothL1".parse::<Criterion>().unwrap(), Criterion::SmoothL1);
        assert_eq!("MSE".parse::<Criterion>().unwrap(), Criterion::Mse);
        assert_eq!("l1".parse::<Criterion>().unwrap(), Criterion::L1);
        assert!("huber".parse::<Criterion>().is_err());
        assert_eq!(Criterion::SmoothL1.to_string(), "SmoothL1");
    }

    #[test]
    fn test_loss_ignores_invalid_joints() {
        let prediction = Array3::from_shape_vec((1, 2, 3), vec![0.5, 0.0, 0.0, 9.0, 9.0, 9.0]).unwrap();
        let truth = Array3::<f32>::zeros((1, 2, 3));
        let valid = arr2(&[[true, false]]);

        let l1 = Criterion::L1
            .loss(prediction.view(), truth.view(), valid.view())
            .unwrap();
        assert_relative_eq!(l1, 0.5 / 3.0);
        let smooth = Criterion::SmoothL1
            .loss(prediction.view(), truth.view(), valid.view())
            .unwrap();
        assert_relative_eq!(smooth, 0.125 / 3.0);

        let none = arr2(&[[false, false]]);
        let zero = Criterion::Mse
            .loss(prediction.view(), truth.view(), none.view())
            .unwrap();
        assert_eq!(zero, 0.0);
    }
}
