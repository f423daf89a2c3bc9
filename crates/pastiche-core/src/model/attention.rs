//! Transformer encoder block.
//!
//! A single pre-norm ViT encoder block combining:
//! - LayerNorm
//! - Multi-head self-attention (fused QKV projection)
//! - LayerNorm
//! - GELU MLP
//!
//! Attention is bidirectional: every patch token attends to every other.

use super::{linear, GeluMlp, LayerNorm};
use crate::error::Result;
use candle_core::{DType, Device, Tensor, D};

/// Multi-head self-attention with a fused QKV projection.
#[derive(Debug, Clone)]
pub struct Attention {
    /// Fused projection: [3 * hidden_size, hidden_size]
    qkv_weight: Tensor,
    qkv_bias: Tensor,
    /// Output projection: [hidden_size, hidden_size]
    proj_weight: Tensor,
    proj_bias: Tensor,
    /// Number of attention heads.
    num_heads: usize,
    /// Head dimension.
    head_dim: usize,
    /// Hidden size.
    hidden_size: usize,
}

impl Attention {
    /// Create attention with random weights (for testing).
    pub fn random(hidden_size: usize, num_heads: usize, device: &Device) -> Result<Self> {
        let qkv_weight = Tensor::randn(0.0f32, 0.02, &[3 * hidden_size, hidden_size], device)?;
        let proj_weight = Tensor::randn(0.0f32, 0.02, &[hidden_size, hidden_size], device)?;

        Ok(Self {
            qkv_weight,
            qkv_bias: Tensor::zeros(3 * hidden_size, DType::F32, device)?,
            proj_weight,
            proj_bias: Tensor::zeros(hidden_size, DType::F32, device)?,
            num_heads,
            head_dim: hidden_size / num_heads,
            hidden_size,
        })
    }

    /// Create attention with provided weights.
    pub fn new(
        qkv_weight: Tensor,
        qkv_bias: Tensor,
        proj_weight: Tensor,
        proj_bias: Tensor,
        num_heads: usize,
    ) -> Result<Self> {
        let hidden_size = qkv_weight.dims2()?.1;
        Ok(Self {
            qkv_weight,
            qkv_bias,
            proj_weight,
            proj_bias,
            num_heads,
            head_dim: hidden_size / num_heads,
            hidden_size,
        })
    }

    /// Project tokens to query, key and value.
    ///
    /// Input: [batch, seq_len, hidden_size]
    /// Output: three tensors of [batch, num_heads, seq_len, head_dim]
    pub fn project(&self, x: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (batch, seq_len, _) = x.dims3()?;

        let qkv = linear(x, &self.qkv_weight, Some(&self.qkv_bias))?;

        // [batch, seq, 3, num_heads, head_dim] -> [3, batch, num_heads, seq, head_dim]
        let qkv = qkv
            .reshape((batch, seq_len, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;

        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        Ok((q, k, v))
    }

    /// Scaled dot-product attention followed by the output projection.
    ///
    /// Input: [batch, seq_len, hidden_size]
    /// Output: [batch, seq_len, hidden_size]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        let (q, k, v) = self.project(x)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();

        // Attention scores: Q @ K^T / sqrt(d)
        let scores = (q.matmul(&k.t()?)? * scale)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attn = weights.matmul(&v)?;

        // [batch, num_heads, seq, head_dim] -> [batch, seq, hidden]
        let attn = attn
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.hidden_size))?;

        linear(&attn, &self.proj_weight, Some(&self.proj_bias))
    }

    /// Get the number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Get the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

/// A single pre-norm encoder block.
#[derive(Debug, Clone)]
pub struct EncoderBlock {
    norm1: LayerNorm,
    attention: Attention,
    norm2: LayerNorm,
    mlp: GeluMlp,
    /// Block index (for debugging).
    block_idx: usize,
}

impl EncoderBlock {
    /// Create a block from its parts.
    pub fn new(
        norm1: LayerNorm,
        attention: Attention,
        norm2: LayerNorm,
        mlp: GeluMlp,
        block_idx: usize,
    ) -> Self {
        Self {
            norm1,
            attention,
            norm2,
            mlp,
            block_idx,
        }
    }

    /// Create a block with random weights (for testing).
    pub fn random(
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        eps: f64,
        block_idx: usize,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            norm1: LayerNorm::identity(hidden_size, eps, device)?,
            attention: Attention::random(hidden_size, num_heads, device)?,
            norm2: LayerNorm::identity(hidden_size, eps, device)?,
            mlp: GeluMlp::random(hidden_size, intermediate_size, device)?,
            block_idx,
        })
    }

    /// Forward pass over `[batch, seq_len, hidden_size]`.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let normed = self.norm1.forward(hidden_states)?;
        let attn_output = self.attention.forward(&normed)?;
        let hidden_states = (hidden_states + attn_output)?;

        let normed = self.norm2.forward(&hidden_states)?;
        let mlp_output = self.mlp.forward(&normed)?;
        Ok((hidden_states + mlp_output)?)
    }

    /// Get the block index.
    pub fn block_idx(&self) -> usize {
        self.block_idx
    }

    /// Get the attention module.
    pub fn attention(&self) -> &Attention {
        &self.attention
    }
}
