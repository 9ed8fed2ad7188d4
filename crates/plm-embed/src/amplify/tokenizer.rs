//! A protein tokenizer for encoding and decoding protein sequences.
//!
//! Wraps a `tokenizers::Tokenizer` vocabulary and adds the AMPLIFY special tokens
//! (padding, masking, beginning/end of sequence markers, unknown residue).
use crate::error::{PipelineError, PipelineResult};
use std::collections::HashSet;
use std::path::Path;
use tokenizers::Tokenizer;

#[derive(Debug, Clone)]
pub struct ProteinTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: u32,
    mask_token_id: u32,
    bos_token_id: u32,
    eos_token_id: u32,
    unk_token_id: u32,
    special_token_ids: HashSet<u32>,
}

impl ProteinTokenizer {
    pub fn new<P: AsRef<Path>>(tokenizer_path: P) -> PipelineResult<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| PipelineError::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        Self::from_tokenizer(tokenizer)
    }

    /// The AMPLIFY vocabulary shipped with this crate.
    pub fn bundled() -> PipelineResult<Self> {
        let tokenizer_bytes = include_bytes!("tokenizer.json");
        let tokenizer = Tokenizer::from_bytes(tokenizer_bytes)
            .map_err(|e| PipelineError::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        Self::from_tokenizer(tokenizer)
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> PipelineResult<Self> {
        let special = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| PipelineError::Tokenizer(format!("Missing {} token", token)))
        };
        let pad_token_id = special("<pad>")?;
        let mask_token_id = special("<mask>")?;
        let bos_token_id = special("<bos>")?;
        let eos_token_id = special("<eos>")?;
        let unk_token_id = special("<unk>")?;

        let special_token_ids = [
            pad_token_id,
            mask_token_id,
            bos_token_id,
            eos_token_id,
            unk_token_id,
        ]
        .into_iter()
        .collect();

        Ok(Self {
            tokenizer,
            pad_token_id,
            mask_token_id,
            bos_token_id,
            eos_token_id,
            unk_token_id,
            special_token_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    pub fn mask_token_id(&self) -> u32 {
        self.mask_token_id
    }

    pub fn bos_token_id(&self) -> u32 {
        self.bos_token_id
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    pub fn token_to_id(&self, token: &str) -> u32 {
        self.tokenizer
            .token_to_id(token)
            .unwrap_or(self.unk_token_id)
    }

    pub fn id_to_token(&self, id: u32) -> String {
        self.tokenizer
            .id_to_token(id)
            .unwrap_or_else(|| "<unk>".to_string())
    }

    /// `<bos>` + one id per residue + `<eos>`.
    ///
    /// With `max_length`, residues are dropped from the tail until the encoding fits;
    /// both markers are always kept.
    pub fn encode(&self, sequence: &str, max_length: Option<usize>) -> Vec<u32> {
        let residues = sequence.chars().filter(|c| !c.is_whitespace());
        let budget = max_length.map(|m| m.saturating_sub(2)).unwrap_or(usize::MAX);
        let mut ids = Vec::with_capacity(sequence.len().min(budget) + 2);
        ids.push(self.bos_token_id);
        ids.extend(
            residues
                .take(budget)
                .map(|c| self.token_to_id(c.encode_utf8(&mut [0; 4]))),
        );
        ids.push(self.eos_token_id);
        ids
    }

    pub fn decode(&self, token_ids: &[u32], skip_special_tokens: bool) -> PipelineResult<String> {
        let ids: Vec<u32> = if skip_special_tokens {
            token_ids
                .iter()
                .filter(|&&id| !self.special_token_ids.contains(&id))
                .copied()
                .collect()
        } else {
            token_ids.to_vec()
        };
        self.tokenizer
            .decode(&ids, skip_special_tokens)
            .map_err(|e| PipelineError::Tokenizer(format!("Failed to decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_vocab() -> PipelineResult<()> {
        let tokenizer = ProteinTokenizer::bundled()?;
        assert_eq!(tokenizer.len(), 27);
        assert_eq!(tokenizer.pad_token_id(), 0);
        assert_eq!(tokenizer.bos_token_id(), 3);
        assert_eq!(tokenizer.eos_token_id(), 4);
        Ok(())
    }

    #[test]
    fn test_encoder_roundtrip() -> PipelineResult<()> {
        let tokenizer = ProteinTokenizer::bundled()?;
        let ids = tokenizer.encode("METVAL", None);
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[0], tokenizer.bos_token_id());
        assert_eq!(ids[7], tokenizer.eos_token_id());
        assert_eq!(tokenizer.decode(&ids, true)?.replace(' ', ""), "METVAL");
        Ok(())
    }

    #[test]
    fn test_truncation_keeps_markers() -> PipelineResult<()> {
        let tokenizer = ProteinTokenizer::bundled()?;
        let ids = tokenizer.encode("MKVLAGHEEL", Some(6));
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], tokenizer.bos_token_id());
        assert_eq!(ids[5], tokenizer.eos_token_id());
        assert_eq!(tokenizer.decode(&ids, true)?.replace(' ', ""), "MKVL");
        Ok(())
    }

    #[test]
    fn test_unknown_residues_map_to_unk() -> PipelineResult<()> {
        let tokenizer = ProteinTokenizer::bundled()?;
        let ids = tokenizer.encode("MBZ", None);
        assert_eq!(ids[2], tokenizer.token_to_id("<unk>"));
        assert_eq!(ids[3], tokenizer.token_to_id("<unk>"));
        Ok(())
    }
}
