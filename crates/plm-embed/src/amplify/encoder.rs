use super::config::AMPLIFYConfig;
use super::rotary::apply_rotary_emb;
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear_b, ops::softmax_last_dim, rms_norm, Linear, RmsNorm, VarBuilder};

/// Amplify EncoderBlock implementation
///
/// Pre-norm attention followed by a SwiGLU feed forward block.
///
/// - [T5](https://github.com/huggingface/candle/blob/e2b6b367fa852ed30ac532f8d77cd8479c7ed092/candle-transformers/src/models/t5.rs#L331)
/// - [SwiGLu Implementation](https://github.com/facebookresearch/xformers/blob/main/xformers/ops/swiglu_op.py#L462)
#[derive(Debug)]
pub struct EncoderBlock {
    q: Linear,
    k: Linear,
    v: Linear,
    wo: Linear,
    w12: Linear,
    w3: Linear,
    ffn_norm: RmsNorm,
    attention_norm: RmsNorm,
    num_heads: usize,
    d_head: usize,
}

impl EncoderBlock {
    /// `attn_bias`: additive `[batch, 1, 1, seq_len]` mask, broadcast over heads and queries.
    pub fn forward(&self, x: &Tensor, attn_bias: Option<&Tensor>, freqs_cis: &Tensor) -> Result<Tensor> {
        let normed = self.attention_norm.forward(x)?;
        let attn = self.attention_block(&normed, attn_bias, freqs_cis)?;
        let x = x.add(&attn)?;
        let normed = self.ffn_norm.forward(&x)?;
        let ff = self.ffn_forward(&normed)?;
        x.add(&ff)
    }
    // swiglu
    fn ffn_forward(&self, x: &Tensor) -> Result<Tensor> {
        let w12_out = self.w12.forward(x)?;
        let chunks = w12_out.chunk(2, D::Minus1)?;
        let hidden = chunks[0].silu()?.mul(&chunks[1])?;
        self.w3.forward(&hidden)
    }
    fn attention_block(
        &self,
        x: &Tensor,
        attn_bias: Option<&Tensor>,
        freqs_cis: &Tensor,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;
        let shape = (batch_size, seq_len, self.num_heads, self.d_head);
        let xq = self.q.forward(x)?.reshape(shape)?;
        let xk = self.k.forward(x)?.reshape(shape)?;
        let xv = self.v.forward(x)?.reshape(shape)?;
        let (xq, xk) = apply_rotary_emb(&xq, &xk, freqs_cis)?;

        // `[batch, seq_len, num_heads, head_dim]` → `[batch, num_heads, seq_len, head_dim]`
        let xq = xq.transpose(1, 2)?.contiguous()?;
        let xk = xk.transpose(1, 2)?.contiguous()?;
        let xv = xv.transpose(1, 2)?.contiguous()?;

        let scale = 1.0 / (self.d_head as f64).sqrt();
        let scores = (xq.matmul(&xk.t()?)? * scale)?;
        let scores = match attn_bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };
        let attn = softmax_last_dim(&scores)?.matmul(&xv)?;

        let output = attn
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.d_head))?;
        self.wo.forward(&output)
    }

    /// Load Weights from a Model
    pub fn load(vb: VarBuilder, config: &AMPLIFYConfig, layer: usize) -> Result<Self> {
        // To keep the number of parameters and the amount of computation constant, we reduce the number of
        // hidden units by a factor of 2/3 (https://arxiv.org/pdf/2002.05202.pdf) and make it a multiple of 8
        let multiple_of = 8;
        let intermediate_size = (config.intermediate_size * 2) / 3;
        let intermediate_size = intermediate_size.div_ceil(multiple_of) * multiple_of;
        let vb = vb.pp(layer);
        let hidden = config.hidden_size;
        let q = linear_b(hidden, hidden, config.att_bias, vb.pp("q"))?;
        let k = linear_b(hidden, hidden, config.att_bias, vb.pp("k"))?;
        let v = linear_b(hidden, hidden, config.att_bias, vb.pp("v"))?;
        let wo = linear_b(hidden, hidden, config.att_bias, vb.pp("wo"))?;
        let w12 = linear_b(hidden, intermediate_size * 2, config.ffn_bias, vb.pp("ffn.w12"))?;
        let w3 = linear_b(intermediate_size, hidden, config.ffn_bias, vb.pp("ffn.w3"))?;
        let ffn_norm = rms_norm(hidden, config.norm_eps, vb.pp("ffn_norm"))?;
        let attention_norm = rms_norm(hidden, config.norm_eps, vb.pp("attention_norm"))?;

        Ok(Self {
            q,
            k,
            v,
            wo,
            w12,
            w3,
            attention_norm,
            ffn_norm,
            num_heads: config.num_attention_heads,
            d_head: config.head_dim(),
        })
    }
}
