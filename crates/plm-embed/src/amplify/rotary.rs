use candle_core::{DType, Device, Result, Tensor, D};

/// Rotary frequencies as a `[seq_len, head_dim / 2, 2]` tensor of (cos, sin) pairs.
pub fn precompute_freqs_cis(head_dim: usize, seq_len: usize) -> Result<Tensor> {
    let theta: f32 = 10000.0;
    let freqs: Vec<f32> = (0..head_dim / 2)
        .map(|i| 1.0 / theta.powf((2 * i) as f32 / head_dim as f32))
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, head_dim / 2), &Device::Cpu)?;
    let t = Tensor::arange(0u32, seq_len as u32, &Device::Cpu)?
        .to_dtype(DType::F32)?
        .reshape((seq_len, 1))?;
    // outer product
    let freqs = t.matmul(&freqs)?;
    Tensor::stack(&[freqs.cos()?, freqs.sin()?], D::Minus1)
}

/// Rotate query and key pairs `(x[2i], x[2i + 1])` by the position angles.
///
/// `xq`, `xk`: `[batch, seq_len, heads, head_dim]`.
pub fn apply_rotary_emb(xq: &Tensor, xk: &Tensor, freqs_cis: &Tensor) -> Result<(Tensor, Tensor)> {
    let (_b_sz, seq_len, _h, headdim) = xq.dims4()?;
    let half = headdim / 2;
    let freqs_cis = freqs_cis.narrow(0, 0, seq_len)?.to_dtype(xq.dtype())?;
    let cos = freqs_cis.narrow(D::Minus1, 0, 1)?.reshape((1, seq_len, 1, half))?;
    let sin = freqs_cis.narrow(D::Minus1, 1, 1)?.reshape((1, seq_len, 1, half))?;

    let rotate = |x: &Tensor| -> Result<Tensor> {
        let (b, l, h, d) = x.dims4()?;
        let x = x.reshape((b, l, h, d / 2, 2))?;
        let x_re = x.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
        let x_im = x.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
        let out_re = (x_re.broadcast_mul(&cos)? - x_im.broadcast_mul(&sin)?)?;
        let out_im = (x_re.broadcast_mul(&sin)? + x_im.broadcast_mul(&cos)?)?;
        Tensor::stack(&[out_re, out_im], D::Minus1)?.reshape((b, l, h, d))
    };

    Ok((rotate(xq)?, rotate(xk)?))
}
