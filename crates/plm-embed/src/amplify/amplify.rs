//! AMPLIFY is an optimized transformer model focused on optimizing the context of sequence models
//! while maintaining computational efficiency.
//!
//! Key features:
//! - Rotary positional embeddings
//! - RMSNorm for improved training stability
//! - SwiGLU activation function
//!
use super::config::AMPLIFYConfig;
use super::encoder::EncoderBlock;
use super::outputs::ModelOutput;
use super::rotary::precompute_freqs_cis;
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, linear, rms_norm, Embedding, Linear, RmsNorm, VarBuilder};

/// How a padding mask handed to [`AMPLIFY::forward`] is encoded.
///
/// The two AMPLIFY distributions disagree here, each one is kept as its own contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskConvention {
    /// Hub checkpoints: `1.0` marks a position to ignore, `0.0` one to attend to.
    /// The model turns the ones into `-inf` itself.
    Binary,
    /// Original training checkpoints: `-inf` marks a position to ignore, added to the
    /// attention scores unchanged.
    Additive,
}

impl MaskConvention {
    /// Encode a `[batch, seq_len]` boolean mask (`true` = padded) in this convention.
    pub fn encode(&self, padding: &[Vec<bool>], dtype: DType, device: &Device) -> Result<Tensor> {
        let batch = padding.len();
        let seq_len = padding.first().map(|row| row.len()).unwrap_or(0);
        let (ignore, keep) = match self {
            MaskConvention::Binary => (1f32, 0f32),
            MaskConvention::Additive => (f32::NEG_INFINITY, 0f32),
        };
        let values: Vec<f32> = padding
            .iter()
            .flat_map(|row| row.iter().map(|&pad| if pad { ignore } else { keep }))
            .collect();
        Tensor::from_vec(values, (batch, seq_len), device)?.to_dtype(dtype)
    }
}

/// The AMPLIFY model
///
/// - [GH PythonModel](https://github.com/chandar-lab/AMPLIFY/blob/rc-0.1/src/amplify/model/amplify.py)
/// - [paper](https://www.biorxiv.org/content/10.1101/2024.09.23.614603v1)
/// - [HF](https://huggingface.co/chandar-lab/AMPLIFY_120M)
///
#[derive(Debug)]
pub struct AMPLIFY {
    encoder: Embedding,
    layer_norm_1: Option<RmsNorm>,
    transformer_encoder: Vec<EncoderBlock>,
    layer_norm_2: Option<RmsNorm>,
    decoder: Linear,
    freqs_cis: Tensor,
    config: AMPLIFYConfig,
    dtype: DType,
}

impl AMPLIFY {
    /// Turn a `[batch, seq_len]` mask into a `[batch, 1, 1, seq_len]` additive bias.
    ///
    /// Returns `None` when nothing is masked.
    fn process_attention_mask(
        &self,
        pad_mask: Option<&Tensor>,
        convention: MaskConvention,
    ) -> Result<Option<Tensor>> {
        let Some(mask) = pad_mask else {
            return Ok(None);
        };
        let bias = match convention {
            MaskConvention::Binary => {
                let ignore = mask.to_dtype(DType::F32)?.ne(0f32)?;
                let zeros = Tensor::zeros(mask.shape(), DType::F32, mask.device())?;
                let neg_inf = Tensor::full(f32::NEG_INFINITY, mask.shape(), mask.device())?;
                ignore.where_cond(&neg_inf, &zeros)?
            }
            MaskConvention::Additive => mask.to_dtype(DType::F32)?,
        };
        let masked = bias.ne(0f32)?.to_dtype(DType::F32)?.sum_all()?.to_scalar::<f32>()?;
        if masked == 0.0 {
            return Ok(None);
        }
        let (batch_size, seq_len) = bias.dims2()?;
        Ok(Some(
            bias.reshape((batch_size, 1, 1, seq_len))?
                .to_dtype(self.dtype)?,
        ))
    }
    pub fn forward(
        &self,
        src: &Tensor,
        pad_mask: Option<&Tensor>,
        convention: MaskConvention,
        output_hidden_states: bool,
    ) -> Result<ModelOutput> {
        let mut hidden_states = vec![];
        let attn_bias = self.process_attention_mask(pad_mask, convention)?;
        let freqs_cis = self.freqs_cis.narrow(0, 0, src.dim(1)?)?;
        let mut x = self.encoder.forward(src)?;
        if let Some(norm) = &self.layer_norm_1 {
            x = norm.forward(&x)?;
        }
        for layer in self.transformer_encoder.iter() {
            x = layer.forward(&x, attn_bias.as_ref(), &freqs_cis)?;
            if output_hidden_states {
                hidden_states.push(x.clone());
            }
        }
        let logits = match &self.layer_norm_2 {
            Some(norm) => self.decoder.forward(&norm.forward(&x)?)?,
            None => self.decoder.forward(&x)?,
        };

        Ok(ModelOutput {
            logits,
            hidden_states: if output_hidden_states {
                Some(hidden_states)
            } else {
                None
            },
        })
    }
    pub fn load(vb: VarBuilder, cfg: &AMPLIFYConfig) -> Result<Self> {
        let mut transformer_encoder = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            transformer_encoder.push(EncoderBlock::load(vb.pp("transformer_encoder"), cfg, i)?);
        }
        let encoder = embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("encoder"))?;
        let layer_norm_1 = if cfg.layer_norm_after_embedding {
            Some(rms_norm(cfg.hidden_size, cfg.norm_eps, vb.pp("layer_norm_1"))?)
        } else {
            None
        };
        let layer_norm_2 = if cfg.layer_norm_before_last_layer {
            Some(rms_norm(cfg.hidden_size, cfg.norm_eps, vb.pp("layer_norm_2"))?)
        } else {
            None
        };
        let decoder = linear(cfg.hidden_size, cfg.vocab_size, vb.pp("decoder"))?;
        let freqs_cis = precompute_freqs_cis(cfg.head_dim(), cfg.max_length)?.to_device(vb.device())?;

        Ok(Self {
            encoder,
            layer_norm_1,
            transformer_encoder,
            layer_norm_2,
            decoder,
            freqs_cis,
            config: cfg.clone(),
            dtype: vb.dtype(),
        })
    }
    pub fn get_device(&self) -> &Device {
        self.freqs_cis.device()
    }
    pub fn dtype(&self) -> DType {
        self.dtype
    }
    pub fn config(&self) -> &AMPLIFYConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_nn::VarMap;

    pub(crate) fn tiny_config() -> AMPLIFYConfig {
        AMPLIFYConfig {
            hidden_size: 16,
            num_hidden_layers: 3,
            num_attention_heads: 2,
            intermediate_size: 24,
            max_length: 64,
            ..AMPLIFYConfig::amp_120m()
        }
    }

    pub(crate) fn tiny_model() -> Result<AMPLIFY> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        AMPLIFY::load(vb, &tiny_config())
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let model = tiny_model()?;
        let ids = Tensor::new(&[[3u32, 10, 11, 12, 4, 0, 0, 0]], &Device::Cpu)?;
        let out = model.forward(&ids, None, MaskConvention::Additive, true)?;
        assert_eq!(out.logits.dims(), &[1, 8, 27]);
        let hidden = out.hidden_states.unwrap();
        assert_eq!(hidden.len(), 3);
        assert_eq!(hidden[0].dims(), &[1, 8, 16]);
        Ok(())
    }

    #[test]
    fn test_layer_norm_after_embedding() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = AMPLIFYConfig {
            layer_norm_after_embedding: true,
            ..tiny_config()
        };
        let model = AMPLIFY::load(vb, &config)?;
        assert!(model.layer_norm_1.is_some());
        assert!(varmap.data().lock().unwrap().contains_key("layer_norm_1.weight"));
        assert!(tiny_model()?.layer_norm_1.is_none());

        // the first hidden state sees normalized embeddings
        let ids = Tensor::new(&[[3u32, 10, 11, 4]], &Device::Cpu)?;
        let normed = model.forward(&ids, None, MaskConvention::Additive, true)?;
        let embedded = model.encoder.forward(&ids)?;
        let expected = model.transformer_encoder[0].forward(
            &model.layer_norm_1.as_ref().unwrap().forward(&embedded)?,
            None,
            &model.freqs_cis.narrow(0, 0, 4)?,
        )?;
        let diff: f32 = (&normed.hidden_states.unwrap()[0] - &expected)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_mask_conventions_agree() -> Result<()> {
        let model = tiny_model()?;
        let ids = Tensor::new(&[[3u32, 10, 11, 4, 0, 0, 0, 0]], &Device::Cpu)?;
        let padding = vec![vec![false, false, false, false, true, true, true, true]];
        let binary = MaskConvention::Binary.encode(&padding, DType::F32, &Device::Cpu)?;
        let additive = MaskConvention::Additive.encode(&padding, DType::F32, &Device::Cpu)?;
        let a = model.forward(&ids, Some(&binary), MaskConvention::Binary, true)?;
        let b = model.forward(&ids, Some(&additive), MaskConvention::Additive, true)?;
        let diff = (a.logits - b.logits)?
            .abs()?
            .max_keepdim(2)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(diff.iter().all(|d| *d < 1e-5));
        Ok(())
    }

    #[test]
    fn test_empty_mask_is_dropped() -> Result<()> {
        let model = tiny_model()?;
        let mask = MaskConvention::Binary.encode(&[vec![false; 8]], DType::F32, &Device::Cpu)?;
        assert!(model
            .process_attention_mask(Some(&mask), MaskConvention::Binary)?
            .is_none());
        Ok(())
    }
}
