//! Vision Transformer feature stack.
//!
//! Pixels `[1, 3, H, W]` are unfolded into non-overlapping patches, linearly
//! embedded, prefixed with a CLS token and offset by learned positional
//! embeddings before running through the encoder blocks. Each block output
//! is folded back into a spatial map `[1, D, H/ps, W/ps]` so that downstream
//! losses see the same layout as the convolutional backbone.

use super::{linear, Attention, EncoderBlock, GeluMlp, LayerNorm, VitConfig, WeightLoader};
use crate::error::{PasticheError, Result};
use candle_core::{Device, Tensor};

/// Patch + position embedding.
#[derive(Debug, Clone)]
pub struct PatchEmbedding {
    /// Flattened conv kernel: [hidden_size, 3 * ps * ps]
    weight: Tensor,
    bias: Tensor,
    /// [1, 1, hidden_size]
    cls_token: Tensor,
    /// [1, 1 + grid * grid, hidden_size]
    pos_embed: Tensor,
    patch_size: usize,
    /// Patch grid side the positional table was trained for.
    grid_size: usize,
}

impl PatchEmbedding {
    /// Create an embedding with random weights (for testing).
    pub fn random(config: &VitConfig, device: &Device) -> Result<Self> {
        let ps = config.patch_size;
        let grid = config.grid_size();
        let hidden = config.hidden_size;
        let fan_in = (3 * ps * ps) as f64;
        Ok(Self {
            weight: Tensor::randn(0.0f32, (1.0 / fan_in.sqrt()) as f32, &[hidden, 3 * ps * ps], device)?,
            bias: Tensor::zeros(hidden, candle_core::DType::F32, device)?,
            cls_token: Tensor::randn(0.0f32, 0.02, &[1, 1, hidden], device)?,
            pos_embed: Tensor::randn(0.0f32, 0.02, &[1, 1 + grid * grid, hidden], device)?,
            patch_size: ps,
            grid_size: grid,
        })
    }

    /// Load from timm-style names (`patch_embed.proj`, `cls_token`, `pos_embed`).
    pub fn from_loader(config: &VitConfig, loader: &WeightLoader) -> Result<Self> {
        let ps = config.patch_size;
        let grid = config.grid_size();
        let hidden = config.hidden_size;

        // Conv kernel [D, 3, ps, ps] flattens in the same (c, y, x) order as the patches.
        let weight = loader
            .get_shaped("patch_embed.proj.weight", &[hidden, 3, ps, ps])?
            .reshape((hidden, 3 * ps * ps))?;
        let bias = loader.get_shaped("patch_embed.proj.bias", &[hidden])?;
        let cls_token = loader.get_shaped("cls_token", &[1, 1, hidden])?;
        let pos_embed = loader.get_shaped("pos_embed", &[1, 1 + grid * grid, hidden])?;

        Ok(Self {
            weight,
            bias,
            cls_token,
            pos_embed,
            patch_size: ps,
            grid_size: grid,
        })
    }

    /// Embed `[1, 3, H, W]` (H, W multiples of the patch size) into
    /// `[1, 1 + gh * gw, hidden]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, _, h, w) = x.dims4()?;
        let gh = h / self.patch_size;
        let gw = w / self.patch_size;

        let patches = im2patches(x, self.patch_size)?;
        let tokens = linear(&patches, &self.weight, Some(&self.bias))?;

        let hidden = self.cls_token.dim(2)?;
        let cls = self.cls_token.expand((b, 1, hidden))?;
        let tokens = Tensor::cat(&[&cls, &tokens], 1)?;

        let pos = self.position_table(gh, gw)?;
        Ok(tokens.broadcast_add(&pos)?)
    }

    /// Positional table for a `gh x gw` grid, interpolating the patch part
    /// when the grid differs from the trained one.
    fn position_table(&self, gh: usize, gw: usize) -> Result<Tensor> {
        if (gh, gw) == (self.grid_size, self.grid_size) {
            return Ok(self.pos_embed.clone());
        }

        let d = self.pos_embed.dim(2)?;
        let n = self.grid_size * self.grid_size;
        let cls_pos = self.pos_embed.narrow(1, 0, 1)?;
        let patch_pos = self
            .pos_embed
            .narrow(1, 1, n)?
            .reshape((1, self.grid_size, self.grid_size, d))?
            .permute((0, 3, 1, 2))?
            .interpolate2d(gh, gw)?
            .permute((0, 2, 3, 1))?
            .reshape((1, gh * gw, d))?;

        Ok(Tensor::cat(&[&cls_pos, &patch_pos], 1)?)
    }

    /// Patch side.
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }
}

/// Unfold `[B, C, H, W]` into `[B, (H/ps) * (W/ps), C * ps * ps]`.
fn im2patches(x: &Tensor, patch_size: usize) -> Result<Tensor> {
    let (b, c, h, w) = x.dims4()?;
    let py = h / patch_size;
    let px = w / patch_size;
    let ps = patch_size;

    // [B, C, py*ps, px*ps] -> [B, C, py, ps, px, ps] -> [B, py, px, C, ps, ps]
    let x = x
        .reshape((b, c, py, ps, px, ps))?
        .permute((0, 2, 4, 1, 3, 5))?;
    Ok(x.reshape((b, py * px, c * ps * ps))?)
}

/// Vision Transformer encoder used as a frozen feature extractor.
#[derive(Debug, Clone)]
pub struct VisionTransformer {
    embedding: PatchEmbedding,
    blocks: Vec<EncoderBlock>,
    config: VitConfig,
}

impl VisionTransformer {
    /// Create a transformer with random weights (for testing).
    pub fn random(config: &VitConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let embedding = PatchEmbedding::random(config, device)?;
        let blocks = (0..config.num_layers)
            .map(|i| {
                EncoderBlock::random(
                    config.hidden_size,
                    config.intermediate_size,
                    config.num_heads,
                    config.layer_norm_eps,
                    i,
                    device,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embedding,
            blocks,
            config: config.clone(),
        })
    }

    /// Load pretrained timm weights.
    pub fn from_loader(config: &VitConfig, loader: &WeightLoader) -> Result<Self> {
        config.validate()?;
        let d = config.hidden_size;
        let m = config.intermediate_size;
        let eps = config.layer_norm_eps;

        let embedding = PatchEmbedding::from_loader(config, loader)?;

        let mut blocks = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let p = format!("blocks.{i}");
            let norm1 = LayerNorm::new(
                loader.get_shaped(&format!("{p}.norm1.weight"), &[d])?,
                loader.get_shaped(&format!("{p}.norm1.bias"), &[d])?,
                eps,
            )?;
            let attention = Attention::new(
                loader.get_shaped(&format!("{p}.attn.qkv.weight"), &[3 * d, d])?,
                loader.get_shaped(&format!("{p}.attn.qkv.bias"), &[3 * d])?,
                loader.get_shaped(&format!("{p}.attn.proj.weight"), &[d, d])?,
                loader.get_shaped(&format!("{p}.attn.proj.bias"), &[d])?,
                config.num_heads,
            )?;
            let norm2 = LayerNorm::new(
                loader.get_shaped(&format!("{p}.norm2.weight"), &[d])?,
                loader.get_shaped(&format!("{p}.norm2.bias"), &[d])?,
                eps,
            )?;
            let mlp = GeluMlp::new(
                loader.get_shaped(&format!("{p}.mlp.fc1.weight"), &[m, d])?,
                loader.get_shaped(&format!("{p}.mlp.fc1.bias"), &[m])?,
                loader.get_shaped(&format!("{p}.mlp.fc2.weight"), &[d, m])?,
                loader.get_shaped(&format!("{p}.mlp.fc2.bias"), &[d])?,
            )?;
            blocks.push(EncoderBlock::new(norm1, attention, norm2, mlp, i));
        }

        Ok(Self {
            embedding,
            blocks,
            config: config.clone(),
        })
    }

    /// Stage names in forward order: `block_0`, `block_1`, ...
    pub fn layer_names(&self) -> Vec<String> {
        (0..self.blocks.len()).map(|i| format!("block_{i}")).collect()
    }

    /// Run the encoder up to block `last`, handing each block's spatial
    /// feature map to `visit`.
    pub fn forward_layers(
        &self,
        image: &Tensor,
        last: usize,
        visit: &mut dyn FnMut(usize, &Tensor) -> Result<()>,
    ) -> Result<()> {
        if last >= self.blocks.len() {
            return Err(PasticheError::InvalidConfig(format!(
                "stage {} out of range for {} blocks",
                last,
                self.blocks.len()
            )));
        }

        let x = self.fit_to_patches(image)?;
        let (_, _, h, w) = x.dims4()?;
        let ps = self.config.patch_size;
        let (gh, gw) = (h / ps, w / ps);

        let mut hidden = self.embedding.forward(&x)?;
        for (i, block) in self.blocks.iter().take(last + 1).enumerate() {
            hidden = block.forward(&hidden)?;
            let map = tokens_to_map(&hidden, gh, gw)?;
            visit(i, &map)?;
        }
        Ok(())
    }

    /// Pad (edge replication) so both sides are multiples of the patch size.
    fn fit_to_patches(&self, image: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = image.dims4()?;
        let ps = self.config.patch_size;
        let th = h.div_ceil(ps).max(1) * ps;
        let tw = w.div_ceil(ps).max(1) * ps;

        let mut x = image.clone();
        if th != h {
            x = x.pad_with_same(2, 0, th - h)?;
        }
        if tw != w {
            x = x.pad_with_same(3, 0, tw - w)?;
        }
        Ok(x)
    }

    /// Get the configuration.
    pub fn config(&self) -> &VitConfig {
        &self.config
    }
}

/// Drop the CLS token and fold `[B, 1 + gh*gw, D]` into `[B, D, gh, gw]`.
fn tokens_to_map(hidden: &Tensor, gh: usize, gw: usize) -> Result<Tensor> {
    let (b, n, d) = hidden.dims3()?;
    let patches = hidden.narrow(1, 1, n - 1)?;
    Ok(patches.transpose(1, 2)?.reshape((b, d, gh, gw))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use std::collections::HashMap;

    fn small_config() -> VitConfig {
        VitConfig {
            image_size: 32,
            patch_size: 8,
            hidden_size: 32,
            num_layers: 3,
            num_heads: 4,
            intermediate_size: 64,
            layer_norm_eps: 1e-6,
        }
    }

    #[test]
    fn im2patches_layout() {
        // 1 channel, 4x4 image, 2x2 patches: first patch is the top-left block.
        let x = Tensor::arange(0f32, 16., &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap();
        let patches = im2patches(&x, 2).unwrap();
        assert_eq!(patches.dims(), &[1, 4, 4]);
        let first: Vec<f32> = patches.get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(first, vec![0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn embedding_shape_at_native_grid() {
        let config = small_config();
        let embed = PatchEmbedding::random(&config, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (1, 3, 32, 32), &Device::Cpu).unwrap();
        assert_eq!(embed.forward(&x).unwrap().dims(), &[1, 17, 32]);
    }

    #[test]
    fn embedding_interpolates_positions() {
        let config = small_config();
        let embed = PatchEmbedding::random(&config, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (1, 3, 64, 48), &Device::Cpu).unwrap();
        // 8 x 6 grid + CLS
        assert_eq!(embed.forward(&x).unwrap().dims(), &[1, 49, 32]);
    }

    #[test]
    fn block_maps_are_spatial() {
        let vit = VisionTransformer::random(&small_config(), &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (1, 3, 64, 64), &Device::Cpu).unwrap();

        let mut shapes = Vec::new();
        vit.forward_layers(&x, 2, &mut |i, map| {
            shapes.push((i, map.dims().to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(shapes.len(), 3);
        for (i, (idx, dims)) in shapes.iter().enumerate() {
            assert_eq!(*idx, i);
            assert_eq!(dims, &vec![1, 32, 8, 8]);
        }
    }

    #[test]
    fn odd_sizes_are_padded_internally() {
        let vit = VisionTransformer::random(&small_config(), &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (1, 3, 30, 20), &Device::Cpu).unwrap();

        let mut dims = Vec::new();
        vit.forward_layers(&x, 0, &mut |_, map| {
            dims = map.dims().to_vec();
            Ok(())
        })
        .unwrap();
        assert_eq!(dims, vec![1, 32, 4, 3]);
    }

    #[test]
    fn gradients_reach_padded_input() {
        let vit = VisionTransformer::random(&small_config(), &Device::Cpu).unwrap();
        let x = candle_core::Var::randn(0.0f32, 1.0, (1, 3, 30, 20), &Device::Cpu).unwrap();

        let mut out = None;
        vit.forward_layers(x.as_tensor(), 1, &mut |_, map| {
            out = Some(map.sqr()?.sum_all()?);
            Ok(())
        })
        .unwrap();

        let grads = out.unwrap().backward().unwrap();
        let grad = grads.get(x.as_tensor()).unwrap();
        assert_eq!(grad.dims(), &[1, 3, 30, 20]);
    }

    #[test]
    fn stage_out_of_range() {
        let vit = VisionTransformer::random(&small_config(), &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 3, 32, 32), DType::F32, &Device::Cpu).unwrap();
        assert!(vit.forward_layers(&x, 3, &mut |_, _| Ok(())).is_err());
        assert_eq!(vit.layer_names(), vec!["block_0", "block_1", "block_2"]);
    }

    #[test]
    fn loads_timm_names() {
        let config = VitConfig {
            num_layers: 1,
            ..small_config()
        };
        let dev = Device::Cpu;
        let d = config.hidden_size;
        let m = config.intermediate_size;
        let ps = config.patch_size;
        let n = config.grid_size() * config.grid_size();

        let mut tensors = HashMap::new();
        let mut put = |name: &str, dims: &[usize]| {
            tensors.insert(
                name.to_string(),
                Tensor::randn(0.0f32, 0.02, dims, &dev).unwrap(),
            );
        };
        put("patch_embed.proj.weight", &[d, 3, ps, ps]);
        put("patch_embed.proj.bias", &[d]);
        put("cls_token", &[1, 1, d]);
        put("pos_embed", &[1, 1 + n, d]);
        for norm in ["norm1", "norm2"] {
            put(&format!("blocks.0.{norm}.weight"), &[d]);
            put(&format!("blocks.0.{norm}.bias"), &[d]);
        }
        put("blocks.0.attn.qkv.weight", &[3 * d, d]);
        put("blocks.0.attn.qkv.bias", &[3 * d]);
        put("blocks.0.attn.proj.weight", &[d, d]);
        put("blocks.0.attn.proj.bias", &[d]);
        put("blocks.0.mlp.fc1.weight", &[m, d]);
        put("blocks.0.mlp.fc1.bias", &[m]);
        put("blocks.0.mlp.fc2.weight", &[d, m]);
        put("blocks.0.mlp.fc2.bias", &[d]);

        let loader = WeightLoader::from_tensors(tensors, &dev);
        let vit = VisionTransformer::from_loader(&config, &loader).unwrap();
        assert_eq!(vit.layer_names(), vec!["block_0"]);
    }

    #[test]
    fn missing_weights_fail() {
        let loader = WeightLoader::from_tensors(HashMap::new(), &Device::Cpu);
        assert!(VisionTransformer::from_loader(&small_config(), &loader).is_err());
    }
}
