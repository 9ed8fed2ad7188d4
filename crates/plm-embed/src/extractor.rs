//! Embedding extraction
//!
//! Runs a model over every batch, sums the last `K` hidden layers, zeroes padded positions
//! and sums over the sequence axis: one unnormalized vector per protein.
use crate::batching::{Batch, Batcher};
use crate::dataset::ProteinRecord;
use crate::error::{PipelineError, PipelineResult};
use candle_core::{DType, Device, Result, Tensor, D};
use std::collections::HashMap;
use std::path::Path;

/// A sequence model that exposes its per-layer hidden states.
pub trait HiddenStateModel {
    fn hidden_size(&self) -> usize;
    fn num_hidden_layers(&self) -> usize;
    fn device(&self) -> &Device;
    fn dtype(&self) -> DType;
    /// Longest input, in tokens, the model accepts.
    fn max_length(&self) -> Option<usize> {
        None
    }
    /// One `[batch, seq_len, hidden]` tensor per layer, first layer first.
    fn hidden_states(&self, batch: &Batch) -> Result<Vec<Tensor>>;
}

/// Elementwise sum of the last `k` layers, accumulated in `f32`.
pub fn sum_last_layers(hidden_states: &[Tensor], k: usize) -> Result<Tensor> {
    if k == 0 || k > hidden_states.len() {
        candle_core::bail!(
            "cannot select the last {} of {} hidden states",
            k,
            hidden_states.len()
        )
    }
    let selected = hidden_states[hidden_states.len() - k..]
        .iter()
        .map(|h| h.to_dtype(DType::F32))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&selected, 0)?.sum(0)
}

/// `hidden`: `[batch, seq_len, dim]`, `valid`: `[batch, seq_len]` (1 = token, 0 = padding).
///
/// Returns `[batch, dim]` in `f32`; reduced precision cannot hold long sums.
pub fn masked_sum_pool(hidden: &Tensor, valid: &Tensor) -> Result<Tensor> {
    let hidden = hidden.to_dtype(DType::F32)?;
    let valid = valid.to_dtype(DType::F32)?.unsqueeze(D::Minus1)?;
    hidden.broadcast_mul(&valid)?.sum(1)
}

/// Row-major `[n_proteins, dim]` embeddings, sized once up front.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    labels: Vec<String>,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn zeros(labels: Vec<String>, dim: usize) -> Self {
        let data = vec![0.0; labels.len() * dim];
        Self { labels, dim, data }
    }
    pub fn from_rows(labels: Vec<String>, dim: usize, data: Vec<f32>) -> PipelineResult<Self> {
        if data.len() != labels.len() * dim {
            return Err(PipelineError::Shape(format!(
                "{} values cannot fill {} rows of width {}",
                data.len(),
                labels.len(),
                dim
            )));
        }
        Ok(Self { labels, dim, data })
    }
    pub fn len(&self) -> usize {
        self.labels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
    pub fn dim(&self) -> usize {
        self.dim
    }
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
    /// Copy `rows` into consecutive rows starting at `offset`.
    pub fn write_rows(&mut self, offset: usize, rows: &[Vec<f32>]) -> PipelineResult<()> {
        if offset + rows.len() > self.len() {
            return Err(PipelineError::Shape(format!(
                "rows {}..{} out of bounds for {} proteins",
                offset,
                offset + rows.len(),
                self.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != self.dim {
                return Err(PipelineError::Shape(format!(
                    "embedding of width {} in a matrix of width {}",
                    row.len(),
                    self.dim
                )));
            }
            let start = (offset + i) * self.dim;
            self.data[start..start + self.dim].copy_from_slice(row);
        }
        Ok(())
    }
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_slice(&self.data, (self.len(), self.dim), device)
    }
    /// Saved as a single `embeddings` tensor; labels are not part of the file.
    pub fn save_safetensors<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let tensor = self.to_tensor(&Device::Cpu)?;
        candle_core::safetensors::save(&HashMap::from([("embeddings", tensor)]), path)?;
        Ok(())
    }
    pub fn load_safetensors<P: AsRef<Path>>(path: P, labels: Vec<String>) -> PipelineResult<Self> {
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let tensor = tensors
            .get("embeddings")
            .ok_or_else(|| PipelineError::Shape("no `embeddings` tensor in file".to_string()))?;
        let (rows, dim) = tensor.dims2()?;
        if rows != labels.len() {
            return Err(PipelineError::Shape(format!(
                "{} embeddings for {} labels",
                rows,
                labels.len()
            )));
        }
        let data = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Self::from_rows(labels, dim, data)
    }
}

pub struct EmbeddingExtractor<'m, M: HiddenStateModel> {
    model: &'m M,
    layers: usize,
}

impl<'m, M: HiddenStateModel> EmbeddingExtractor<'m, M> {
    /// `layers`: how many of the final hidden layers are summed.
    pub fn new(model: &'m M, layers: usize) -> PipelineResult<Self> {
        if layers == 0 || layers > model.num_hidden_layers() {
            return Err(PipelineError::config(
                "layers",
                format!(
                    "must be between 1 and {} for this model, got {}",
                    model.num_hidden_layers(),
                    layers
                ),
            ));
        }
        Ok(Self { model, layers })
    }
    /// `[batch, hidden]` in `f32`, on the host.
    pub fn embed_batch(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
        let hidden_states = self.model.hidden_states(batch)?;
        let summed = sum_last_layers(&hidden_states, self.layers)?;
        let valid = batch.valid_mask(DType::F32, self.model.device())?;
        masked_sum_pool(&summed, &valid)?
            .to_device(&Device::Cpu)?
            .to_vec2::<f32>()
    }
    pub fn extract(
        &self,
        batcher: &Batcher,
        records: &[ProteinRecord],
    ) -> PipelineResult<EmbeddingMatrix> {
        let labels = records.iter().map(|r| r.label.clone()).collect();
        let mut embeddings = EmbeddingMatrix::zeros(labels, self.model.hidden_size());
        let total = batcher.num_batches(records.len());
        batcher.for_each_batch(records, |batch| {
            let rows = self.embed_batch(&batch)?;
            embeddings.write_rows(batch.offset, &rows)?;
            tracing::debug!(
                offset = batch.offset,
                size = batch.len(),
                seq_len = batch.seq_len(),
                total_batches = total,
                "embedded batch"
            );
            Ok(())
        })?;
        tracing::info!(
            proteins = embeddings.len(),
            dim = embeddings.dim(),
            layers = self.layers,
            "extracted embeddings"
        );
        Ok(embeddings)
    }
}
