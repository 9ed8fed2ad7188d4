//! Run configuration
//!
//! Defaults reproduce the reference AMPLIFY-120M embedding run. Values can come from a
//! JSON file and be overridden on the command line.
use crate::error::PipelineResult;
use crate::loader::ModelSource;
use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    #[default]
    BF16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::BF16 => DType::BF16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// `hf` or `pytorch`.
    pub source: String,
    pub model_id: String,
    pub revision: String,
    pub checkpoint_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,

    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// Token budget per sequence, `<bos>` and `<eos>` included.
    #[validate(range(min = 3))]
    pub max_length: usize,
    pub num_workers: usize,
    /// Number of final hidden layers summed into each embedding.
    #[validate(range(min = 1))]
    pub layers: usize,
    pub device: ComputeDevice,
    pub precision: Precision,

    pub dataset_path: Option<PathBuf>,
    pub label_column: String,
    pub sequence_column: String,
    pub n_rows: Option<usize>,

    #[validate(range(min = 2))]
    pub n_neighbors: usize,
    #[validate(range(min = 0.0))]
    pub min_dist: f32,
    #[validate(range(min = 1))]
    pub n_epochs: usize,
    pub seed: u64,

    pub output_path: PathBuf,
    pub plot_path: Option<PathBuf>,
    pub embeddings_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::Hub.to_string(),
            model_id: "chandar-lab/AMPLIFY_120M".to_string(),
            revision: "main".to_string(),
            checkpoint_path: None,
            config_path: None,
            tokenizer_path: None,
            batch_size: 32,
            max_length: 2048,
            num_workers: 2,
            layers: 1,
            device: ComputeDevice::Auto,
            precision: Precision::BF16,
            dataset_path: None,
            label_column: "name".to_string(),
            sequence_column: "sequence".to_string(),
            n_rows: None,
            n_neighbors: 15,
            min_dist: 0.1,
            n_epochs: 200,
            seed: 42,
            output_path: PathBuf::from("amplify_umap.csv"),
            plot_path: None,
            embeddings_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
    /// Range checks plus the model source tag.
    pub fn check(&self) -> PipelineResult<ModelSource> {
        self.validate()?;
        ModelSource::parse(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.check().unwrap(), ModelSource::Hub);
        assert_eq!(config.precision.dtype(), DType::BF16);
        assert_eq!(config.layers, 1);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() -> PipelineResult<()> {
        let config = PipelineConfig::from_json_str(
            r#"{"source": "pytorch", "batch_size": 4, "device": "cpu", "precision": "f32"}"#,
        )?;
        assert_eq!(config.check()?, ModelSource::Pytorch);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.device, ComputeDevice::Cpu);
        assert_eq!(config.precision, Precision::F32);
        assert_eq!(config.n_neighbors, 15);
        assert_eq!(config.label_column, "name");
        Ok(())
    }

    #[test]
    fn test_invalid_source() {
        let config = PipelineConfig {
            source: "onnx".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.check(), Err(PipelineError::InvalidSource(ref s)) if s == "onnx"));
    }

    #[test]
    fn test_range_checks() {
        let cases = [
            PipelineConfig {
                batch_size: 0,
                ..Default::default()
            },
            PipelineConfig {
                layers: 0,
                ..Default::default()
            },
            PipelineConfig {
                max_length: 2,
                ..Default::default()
            },
            PipelineConfig {
                n_neighbors: 1,
                ..Default::default()
            },
            PipelineConfig {
                min_dist: -0.5,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(config.check(), Err(PipelineError::Config { .. })));
        }
    }

    #[test]
    fn test_enum_tags() {
        assert_eq!("metal".parse::<ComputeDevice>().unwrap(), ComputeDevice::Metal);
        assert_eq!("bf16".parse::<Precision>().unwrap(), Precision::BF16);
        assert_eq!(Precision::F16.to_string(), "f16");
        assert!("tpu".parse::<ComputeDevice>().is_err());
    }
}
