//! Model and tokenizer loading
//!
//! Two sources are understood:
//!
//! - `hf`: a named model on the HuggingFace hub, e.g. `chandar-lab/AMPLIFY_120M`.
//! - `pytorch`: a local safetensors checkpoint plus a JSON config.
//!
use crate::amplify::amplify::{MaskConvention, AMPLIFY};
use crate::amplify::config::AMPLIFYConfig;
use crate::amplify::tokenizer::ProteinTokenizer;
use crate::batching::Batch;
use crate::config::{ComputeDevice, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::HiddenStateModel;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ModelSource {
    #[strum(serialize = "hf")]
    Hub,
    #[strum(serialize = "pytorch")]
    Pytorch,
}

impl ModelSource {
    pub fn parse(tag: &str) -> PipelineResult<Self> {
        tag.parse()
            .map_err(|_| PipelineError::InvalidSource(tag.to_string()))
    }
    pub fn mask_convention(&self) -> MaskConvention {
        match self {
            ModelSource::Hub => MaskConvention::Binary,
            ModelSource::Pytorch => MaskConvention::Additive,
        }
    }
}

pub fn device(requested: ComputeDevice) -> Result<Device> {
    match requested {
        ComputeDevice::Cpu => Ok(Device::Cpu),
        ComputeDevice::Cuda => Device::new_cuda(0),
        ComputeDevice::Metal => Device::new_metal(0),
        ComputeDevice::Auto => {
            if cuda_is_available() {
                Device::new_cuda(0)
            } else if metal_is_available() {
                Device::new_metal(0)
            } else {
                #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
                tracing::info!("running on CPU, build with `--features metal` to run on GPU");
                #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
                tracing::info!("running on CPU, build with `--features cuda` to run on GPU");
                Ok(Device::Cpu)
            }
        }
    }
}

/// An AMPLIFY model bound to the mask convention of the checkpoint it came from.
#[derive(Debug)]
pub struct AmplifyEncoder {
    model: AMPLIFY,
    convention: MaskConvention,
}

impl AmplifyEncoder {
    pub fn new(model: AMPLIFY, convention: MaskConvention) -> Self {
        Self { model, convention }
    }
    pub fn model(&self) -> &AMPLIFY {
        &self.model
    }
    pub fn convention(&self) -> MaskConvention {
        self.convention
    }
}

impl HiddenStateModel for AmplifyEncoder {
    fn hidden_size(&self) -> usize {
        self.model.config().hidden_size
    }
    fn num_hidden_layers(&self) -> usize {
        self.model.config().num_hidden_layers
    }
    fn device(&self) -> &Device {
        self.model.get_device()
    }
    fn dtype(&self) -> DType {
        self.model.dtype()
    }
    fn max_length(&self) -> Option<usize> {
        Some(self.model.config().max_length)
    }
    fn hidden_states(&self, batch: &Batch) -> Result<Vec<Tensor>> {
        let device = self.model.get_device();
        let token_ids = batch.token_tensor(device)?;
        let pad_mask = self
            .convention
            .encode(&batch.padding, self.model.dtype(), device)?;
        let output = self
            .model
            .forward(&token_ids, Some(&pad_mask), self.convention, true)?;
        output
            .hidden_states
            .ok_or_else(|| candle_core::Error::Msg("model returned no hidden states".to_string()))
    }
}

/// Everything needed to build an [`AmplifyEncoder`] from disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub tokenizer: Option<PathBuf>,
}

impl ModelFiles {
    pub fn from_hub(model_id: &str, revision: &str) -> PipelineResult<Self> {
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new()?;
        let api = api.repo(repo);
        tracing::info!(model_id, revision, "fetching model files from the hub");
        Ok(Self {
            config: api.get("config.json")?,
            tokenizer: Some(api.get("tokenizer.json")?),
            weights: api.get("model.safetensors")?,
        })
    }
    pub fn from_checkpoint(
        checkpoint: Option<&Path>,
        config: Option<&Path>,
        tokenizer: Option<&Path>,
    ) -> PipelineResult<Self> {
        let weights = checkpoint
            .ok_or_else(|| PipelineError::config("checkpoint_path", "required for the `pytorch` source"))?;
        let config = config
            .ok_or_else(|| PipelineError::config("config_path", "required for the `pytorch` source"))?;
        Ok(Self {
            config: config.to_path_buf(),
            weights: weights.to_path_buf(),
            tokenizer: tokenizer.map(Path::to_path_buf),
        })
    }
    pub fn load(
        &self,
        convention: MaskConvention,
        dtype: DType,
        device: &Device,
    ) -> PipelineResult<(AmplifyEncoder, ProteinTokenizer)> {
        let config_str = std::fs::read_to_string(&self.config)?;
        let config = AMPLIFYConfig::from_json_str(&config_str)?;
        let tokenizer = match &self.tokenizer {
            Some(path) => ProteinTokenizer::new(path)?,
            None => ProteinTokenizer::bundled()?,
        };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&self.weights], dtype, device)? };
        let model = AMPLIFY::load(vb, &config)?;
        tracing::info!(
            weights = %self.weights.display(),
            layers = config.num_hidden_layers,
            hidden = config.hidden_size,
            ?dtype,
            "loaded AMPLIFY"
        );
        Ok((AmplifyEncoder::new(model, convention), tokenizer))
    }
}

/// Resolve the configured source, fetch or locate its files and load the model.
pub fn load_model(config: &PipelineConfig) -> PipelineResult<(AmplifyEncoder, ProteinTokenizer)> {
    let source = ModelSource::parse(&config.source)?;
    let files = match source {
        ModelSource::Hub => ModelFiles::from_hub(&config.model_id, &config.revision)?,
        ModelSource::Pytorch => ModelFiles::from_checkpoint(
            config.checkpoint_path.as_deref(),
            config.config_path.as_deref(),
            config.tokenizer_path.as_deref(),
        )?,
    };
    let device = device(config.device)?;
    files.load(source.mask_convention(), config.precision.dtype(), &device)
}
