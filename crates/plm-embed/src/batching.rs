//! Tokenize-and-batch
//!
//! Protein records are encoded, grouped into fixed-size batches and padded per batch to
//! a multiple of [`PAD_MULTIPLE`]. Every batch carries a boolean padding mask that is
//! `true` exactly at the filler positions.
use crate::amplify::tokenizer::ProteinTokenizer;
use crate::dataset::ProteinRecord;
use crate::error::{PipelineError, PipelineResult};
use candle_core::{DType, Device, Result, Tensor};
use rayon::prelude::*;
use std::sync::mpsc::sync_channel;

pub const PAD_MULTIPLE: usize = 8;

/// Smallest multiple of [`PAD_MULTIPLE`] that holds `longest` tokens.
pub fn padded_length(longest: usize) -> usize {
    longest.div_ceil(PAD_MULTIPLE) * PAD_MULTIPLE
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedRecord {
    pub label: String,
    pub token_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Batch {
    /// Position of the first record of this batch in the dataset.
    pub offset: usize,
    pub labels: Vec<String>,
    /// `[batch, seq_len]`, padded.
    pub token_ids: Vec<Vec<u32>>,
    /// `[batch, seq_len]`, `true` at padded positions.
    pub padding: Vec<Vec<bool>>,
}

impl Batch {
    pub fn from_records(offset: usize, records: Vec<TokenizedRecord>, pad_token_id: u32) -> Self {
        let longest = records.iter().map(|r| r.token_ids.len()).max().unwrap_or(0);
        let seq_len = padded_length(longest);
        let mut labels = Vec::with_capacity(records.len());
        let mut token_ids = Vec::with_capacity(records.len());
        let mut padding = Vec::with_capacity(records.len());
        for TokenizedRecord {
            label,
            token_ids: mut ids,
        } in records
        {
            let n = ids.len();
            ids.resize(seq_len, pad_token_id);
            padding.push((0..seq_len).map(|i| i >= n).collect());
            token_ids.push(ids);
            labels.push(label);
        }
        Self {
            offset,
            labels,
            token_ids,
            padding,
        }
    }
    pub fn len(&self) -> usize {
        self.labels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
    pub fn seq_len(&self) -> usize {
        self.token_ids.first().map(|row| row.len()).unwrap_or(0)
    }
    /// Unpadded token count of each row.
    pub fn lengths(&self) -> Vec<usize> {
        self.padding
            .iter()
            .map(|row| row.iter().filter(|&&pad| !pad).count())
            .collect()
    }
    pub fn token_tensor(&self, device: &Device) -> Result<Tensor> {
        let flat: Vec<u32> = self.token_ids.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (self.len(), self.seq_len()), device)
    }
    /// `[batch, seq_len]` with `1.0` at real tokens and `0.0` at padding.
    pub fn valid_mask(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        let flat: Vec<f32> = self
            .padding
            .iter()
            .flatten()
            .map(|&pad| if pad { 0.0 } else { 1.0 })
            .collect();
        Tensor::from_vec(flat, (self.len(), self.seq_len()), device)?.to_dtype(dtype)
    }
}

pub struct Batcher<'a> {
    tokenizer: &'a ProteinTokenizer,
    batch_size: usize,
    max_length: usize,
    num_workers: usize,
}

impl<'a> Batcher<'a> {
    pub fn new(tokenizer: &'a ProteinTokenizer, batch_size: usize, max_length: usize) -> Self {
        Self {
            tokenizer,
            batch_size: batch_size.max(1),
            max_length,
            num_workers: 0,
        }
    }
    /// Build batches on `num_workers` background threads ahead of the consumer.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }
    pub fn tokenize(&self, record: &ProteinRecord) -> TokenizedRecord {
        TokenizedRecord {
            label: record.label.clone(),
            token_ids: self
                .tokenizer
                .encode(&record.sequence, Some(self.max_length)),
        }
    }
    pub fn build_batch(&self, offset: usize, records: &[ProteinRecord]) -> Batch {
        let tokenized = records.iter().map(|r| self.tokenize(r)).collect();
        Batch::from_records(offset, tokenized, self.tokenizer.pad_token_id())
    }
    pub fn num_batches(&self, num_records: usize) -> usize {
        num_records.div_ceil(self.batch_size)
    }
    /// Hand every batch to `f`, in dataset order.
    ///
    /// The first error returned by `f` stops batch production and is returned.
    pub fn for_each_batch<F>(&self, records: &[ProteinRecord], mut f: F) -> PipelineResult<()>
    where
        F: FnMut(Batch) -> PipelineResult<()>,
    {
        let chunks: Vec<(usize, &[ProteinRecord])> = records
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, chunk)| (i * self.batch_size, chunk))
            .collect();

        if self.num_workers == 0 {
            for (offset, chunk) in chunks {
                f(self.build_batch(offset, chunk))?;
            }
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()
            .map_err(|e| PipelineError::config("num_workers", e.to_string()))?;
        let (tx, rx) = sync_channel::<Batch>(self.num_workers);
        let window = self.num_workers;

        std::thread::scope(|s| {
            let pool = &pool;
            let chunks = &chunks;
            s.spawn(move || {
                for group in chunks.chunks(window) {
                    let built: Vec<Batch> = pool.install(|| {
                        group
                            .par_iter()
                            .map(|(offset, chunk)| self.build_batch(*offset, chunk))
                            .collect()
                    });
                    for batch in built {
                        if tx.send(batch).is_err() {
                            // consumer stopped early
                            return;
                        }
                    }
                }
            });
            let rx = rx;
            for batch in rx.iter() {
                f(batch)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(seqs: &[&str]) -> Vec<ProteinRecord> {
        seqs.iter()
            .enumerate()
            .map(|(i, s)| ProteinRecord {
                label: format!("p{}", i),
                sequence: s.to_string(),
            })
            .collect()
    }

    fn collect(batcher: &Batcher, recs: &[ProteinRecord]) -> Vec<Batch> {
        let mut out = vec![];
        batcher
            .for_each_batch(recs, |b| {
                out.push(b);
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_padded_length() {
        assert_eq!(padded_length(0), 0);
        assert_eq!(padded_length(1), 8);
        assert_eq!(padded_length(8), 8);
        assert_eq!(padded_length(9), 16);
        assert_eq!(padded_length(23), 24);
    }

    #[test]
    fn test_batches_are_padded_to_multiple_of_eight() {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let recs = records(&["MKV", "MKVLAGHEELMKV", "M", "MKVLAGHEELMKVLAGHEEL", "AC"]);
        let batcher = Batcher::new(&tokenizer, 2, 1024);
        let batches = collect(&batcher, &recs);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 1);
        for batch in &batches {
            let longest = *batch.lengths().iter().max().unwrap();
            assert_eq!(batch.seq_len() % PAD_MULTIPLE, 0);
            assert!(batch.seq_len() >= longest);
            assert!(batch.token_ids.iter().all(|row| row.len() == batch.seq_len()));
        }
        // 13 residues + bos/eos = 15 -> 16
        assert_eq!(batches[0].seq_len(), 16);
    }

    #[test]
    fn test_padding_mask_marks_exactly_padded_positions() {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let recs = records(&["MKV", "MKVLAGHEEL"]);
        let batch = Batcher::new(&tokenizer, 8, 1024).build_batch(0, &recs);
        assert_eq!(batch.seq_len(), 16);
        assert_eq!(batch.lengths(), vec![5, 12]);
        for (ids, pad) in batch.token_ids.iter().zip(batch.padding.iter()) {
            for (id, is_pad) in ids.iter().zip(pad.iter()) {
                if *is_pad {
                    assert_eq!(*id, tokenizer.pad_token_id());
                }
            }
        }
        assert_eq!(batch.padding[0].iter().filter(|p| **p).count(), 11);
    }

    #[test]
    fn test_truncation_is_silent() {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let long = "A".repeat(100);
        let recs = records(&[long.as_str()]);
        let batch = Batcher::new(&tokenizer, 1, 10).build_batch(0, &recs);
        assert_eq!(batch.lengths(), vec![10]);
        assert_eq!(batch.seq_len(), 16);
    }

    #[test]
    fn test_prefetch_preserves_order() {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let seqs: Vec<String> = (1..40).map(|n| "M".repeat(n)).collect();
        let seq_refs: Vec<&str> = seqs.iter().map(|s| s.as_str()).collect();
        let recs = records(&seq_refs);
        let serial = collect(&Batcher::new(&tokenizer, 3, 1024), &recs);
        let parallel = collect(&Batcher::new(&tokenizer, 3, 1024).with_workers(3), &recs);
        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.offset, b.offset);
            assert_eq!(a.labels, b.labels);
            assert_eq!(a.token_ids, b.token_ids);
        }
        let labels: Vec<String> = parallel.iter().flat_map(|b| b.labels.clone()).collect();
        let expected: Vec<String> = recs.iter().map(|r| r.label.clone()).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_consumer_error_stops_prefetch() {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let seqs: Vec<String> = (1..30).map(|n| "K".repeat(n)).collect();
        let seq_refs: Vec<&str> = seqs.iter().map(|s| s.as_str()).collect();
        let recs = records(&seq_refs);
        let batcher = Batcher::new(&tokenizer, 2, 1024).with_workers(2);
        let mut seen = 0;
        let result = batcher.for_each_batch(&recs, |_| {
            seen += 1;
            if seen == 2 {
                return Err(PipelineError::Shape("stop".to_string()));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_batch_tensors() -> Result<()> {
        let tokenizer = ProteinTokenizer::bundled().unwrap();
        let recs = records(&["MKV", "MKVLA"]);
        let batch = Batcher::new(&tokenizer, 2, 1024).build_batch(0, &recs);
        let ids = batch.token_tensor(&Device::Cpu)?;
        assert_eq!(ids.dims(), &[2, 8]);
        let valid = batch.valid_mask(DType::F32, &Device::Cpu)?;
        let counts: Vec<f32> = valid.sum(1)?.to_vec1()?;
        assert_eq!(counts, vec![5.0, 7.0]);
        Ok(())
    }
}
