use candle_core::Tensor;

/// Amplify Model Output
///
///  logits -> distribution of the sequences.
///  hidden_states -> one `[batch, seq_len, hidden]` tensor per encoder layer, in layer order.
#[derive(Debug)]
pub struct ModelOutput {
    pub logits: Tensor,
    pub hidden_states: Option<Vec<Tensor>>,
}
