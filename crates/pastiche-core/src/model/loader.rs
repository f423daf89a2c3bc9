//! SafeTensors weight loading for pretrained backbones.
//!
//! Backbone checkpoints are expected in SafeTensors format, exported either
//! from torchvision (VGG: `features.{n}.weight`) or timm (ViT:
//! `blocks.{i}.attn.qkv.weight`, ...). Every tensor is converted to F32 and
//! detached on load so it never participates in gradient computation.
//!
//! # Example
//!
//! ```ignore
//! use pastiche_core::model::WeightLoader;
//!
//! let loader = WeightLoader::from_file("vgg19.safetensors".as_ref(), &Device::Cpu)?;
//! let kernel = loader.get_shaped("features.0.weight", &[64, 3, 3, 3])?;
//! ```

use crate::error::{PasticheError, Result};
use candle_core::{DType, Device, Tensor};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Weight loader for SafeTensors checkpoints.
pub struct WeightLoader {
    /// Loaded tensors indexed by normalized name.
    tensors: HashMap<String, Tensor>,
    /// Device for loaded tensors.
    device: Device,
}

impl WeightLoader {
    /// Load every `.safetensors` file in a directory.
    pub fn from_dir(dir: &Path, device: &Device) -> Result<Self> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "safetensors") {
                files.push(path);
            }
        }

        // Sort for deterministic loading order
        files.sort();

        if files.is_empty() {
            return Err(PasticheError::ModelError(format!(
                "No .safetensors files found in {}",
                dir.display()
            )));
        }

        let mut tensors = HashMap::new();
        for path in &files {
            tensors.extend(Self::load_safetensors_file(path, device)?);
        }

        Ok(Self {
            tensors,
            device: device.clone(),
        })
    }

    /// Load a single checkpoint file.
    pub fn from_file(path: &Path, device: &Device) -> Result<Self> {
        let tensors = Self::load_safetensors_file(path, device)?;
        Ok(Self {
            tensors,
            device: device.clone(),
        })
    }

    /// Load from a file or a directory of shards.
    pub fn from_path(path: &Path, device: &Device) -> Result<Self> {
        if path.is_dir() {
            Self::from_dir(path, device)
        } else {
            Self::from_file(path, device)
        }
    }

    /// Build directly from named tensors.
    pub fn from_tensors(tensors: HashMap<String, Tensor>, device: &Device) -> Self {
        let tensors = tensors
            .into_iter()
            .map(|(name, t)| (normalize_name(&name), t.detach()))
            .collect();
        Self {
            tensors,
            device: device.clone(),
        }
    }

    fn load_safetensors_file(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
        let data = fs::read(path)?;
        let safetensors = SafeTensors::deserialize(&data).map_err(|e| {
            PasticheError::ModelError(format!("Failed to deserialize {}: {}", path.display(), e))
        })?;

        let mut tensors = HashMap::new();
        for (name, view) in safetensors.tensors() {
            let tensor = Self::view_to_tensor(&view, device)?;
            tensors.insert(normalize_name(&name), tensor);
        }

        Ok(tensors)
    }

    /// Convert a SafeTensors view to an F32 candle tensor.
    fn view_to_tensor(view: &safetensors::tensor::TensorView, device: &Device) -> Result<Tensor> {
        let shape: Vec<usize> = view.shape().to_vec();
        let data = view.data();

        // Raw bytes are not guaranteed to be aligned for the element type.
        let tensor = match view.dtype() {
            safetensors::Dtype::F32 => {
                let values: Vec<f32> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?
            }
            safetensors::Dtype::F16 => {
                let values: Vec<half::f16> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?.to_dtype(DType::F32)?
            }
            safetensors::Dtype::BF16 => {
                let values: Vec<half::bf16> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?.to_dtype(DType::F32)?
            }
            other => {
                return Err(PasticheError::ModelError(format!(
                    "Unsupported weight dtype: {:?}",
                    other
                )));
            }
        };

        Ok(tensor.detach())
    }

    /// Get a tensor by name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Get a tensor by name, returning an error if not found.
    pub fn get_tensor(&self, name: &str) -> Result<Tensor> {
        self.tensors
            .get(name)
            .cloned()
            .ok_or_else(|| PasticheError::ModelError(format!("Tensor not found: {}", name)))
    }

    /// Get a tensor and check its shape.
    pub fn get_shaped(&self, name: &str, dims: &[usize]) -> Result<Tensor> {
        let tensor = self.get_tensor(name)?;
        if tensor.dims() != dims {
            return Err(PasticheError::ShapeMismatch(format!(
                "{}: expected {:?}, got {:?}",
                name,
                dims,
                tensor.dims()
            )));
        }
        Ok(tensor)
    }

    /// Check if a tensor exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Get all tensor names.
    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensors.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of loaded tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if no tensors are loaded.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Get the device tensors are loaded to.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Strip wrapper prefixes added by training frameworks.
///
/// - `module.features.0.weight` -> `features.0.weight` (DataParallel)
/// - `model.blocks.0.norm1.weight` -> `blocks.0.norm1.weight`
pub fn normalize_name(name: &str) -> String {
    let mut name = name;
    for prefix in ["module.", "model."] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("module.features.0.weight"), "features.0.weight");
        assert_eq!(normalize_name("model.blocks.3.attn.qkv.bias"), "blocks.3.attn.qkv.bias");
        assert_eq!(normalize_name("module.model.cls_token"), "cls_token");
        assert_eq!(normalize_name("pos_embed"), "pos_embed");
    }

    #[test]
    fn loader_from_nonexistent_dir() {
        let result = WeightLoader::from_dir(Path::new("/nonexistent/path"), &Device::Cpu);
        assert!(result.is_err());
    }

    #[test]
    fn loader_empty_dir() {
        let temp_dir = std::env::temp_dir().join("pastiche_test_empty_weights");
        let _ = fs::create_dir_all(&temp_dir);

        let result = WeightLoader::from_dir(&temp_dir, &Device::Cpu);
        assert!(matches!(result, Err(PasticheError::ModelError(_))));

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn loader_roundtrip_file() {
        let temp_dir = std::env::temp_dir().join("pastiche_test_weights_file");
        let _ = fs::create_dir_all(&temp_dir);
        let path = temp_dir.join("tiny.safetensors");

        let weight = Tensor::randn(0.0f32, 1.0, (4, 3, 3, 3), &Device::Cpu).unwrap();
        let bias = Tensor::zeros(4, DType::F16, &Device::Cpu).unwrap();
        let tensors = HashMap::from([
            ("module.features.0.weight".to_string(), weight.clone()),
            ("module.features.0.bias".to_string(), bias),
        ]);
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let loader = WeightLoader::from_path(&path, &Device::Cpu).unwrap();
        assert_eq!(loader.len(), 2);
        assert!(loader.contains("features.0.weight"));

        let loaded = loader.get_shaped("features.0.weight", &[4, 3, 3, 3]).unwrap();
        let diff: f32 = (loaded - weight)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(diff, 0.0);

        let bias = loader.get_tensor("features.0.bias").unwrap();
        assert_eq!(bias.dtype(), DType::F32);

        assert!(matches!(
            loader.get_shaped("features.0.bias", &[8]),
            Err(PasticheError::ShapeMismatch(_))
        ));
        assert!(loader.get_tensor("features.2.weight").is_err());

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn half_precision_values_widen_to_f32() {
        let temp_dir = std::env::temp_dir().join("pastiche_test_weights_half");
        let _ = fs::create_dir_all(&temp_dir);
        let path = temp_dir.join("half.safetensors");

        let values = Tensor::new(&[1.5f32, -2.0, 0.25, 8.0], &Device::Cpu).unwrap();
        let tensors = HashMap::from([
            ("a".to_string(), values.to_dtype(DType::F16).unwrap()),
            ("b".to_string(), values.to_dtype(DType::BF16).unwrap()),
        ]);
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let loader = WeightLoader::from_file(&path, &Device::Cpu).unwrap();
        for name in ["a", "b"] {
            let loaded = loader.get_tensor(name).unwrap();
            assert_eq!(loaded.dtype(), DType::F32);
            assert_eq!(loaded.to_vec1::<f32>().unwrap(), vec![1.5, -2.0, 0.25, 8.0]);
        }

        let _ = fs::remove_dir_all(&temp_dir);
    }
}
