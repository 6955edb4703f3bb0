//! Safetensors loading for pretrained weights and checkpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use once_cell::sync::OnceCell;
use safetensors::SafeTensors;
use tracing::debug;

/// A model that is built from its weights file on first access.
pub struct LazyModel<T> {
    path: PathBuf,
    device: Device,
    builder: fn(VarBuilder) -> Result<T>,
    model: OnceCell<T>,
}

impl<T: Send + Sync> LazyModel<T> {
    /// Creates a lazy model; nothing is read until [`LazyModel::get`].
    #[must_use]
    pub fn new(path: impl AsRef<Path>, device: Device, builder: fn(VarBuilder) -> Result<T>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device,
            builder,
            model: OnceCell::new(),
        }
    }

    /// Gets the model, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be read or the builder fails.
    pub fn get(&self) -> Result<&T> {
        self.model.get_or_try_init(|| {
            debug!("Loading model from {}", self.path.display());
            let vb = load_safetensors(&self.path, &self.device)?;
            (self.builder)(vb)
                .with_context(|| format!("Failed to build model from {}", self.path.display()))
        })
    }

    /// Returns true if the model has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Weights file backing this model.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every tensor of a safetensors file onto `device`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid safetensors or
/// holds a dtype candle does not support.
pub fn load_tensors(path: impl AsRef<Path>, device: &Device) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    debug!("Loading safetensors from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model file: {}", path.display()))?;
    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let mut tensor_map = HashMap::new();
    for name in tensors.names() {
        let view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;
        let dtype = safetensors_dtype_to_candle(view.dtype())?;
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)
            .with_context(|| format!("Failed to create tensor '{name}'"))?;
        tensor_map.insert(name.clone(), tensor);
    }
    Ok(tensor_map)
}

/// Loads a safetensors file into a `VarBuilder`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    let tensors = load_tensors(path, device)?;
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}

fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => anyhow::bail!("Unsupported dtype: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[allow(clippy::expect_used)]
    fn write_test_safetensors() -> NamedTempFile {
        use safetensors::serialize;
        use safetensors::tensor::TensorView;

        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes: &[u8] = bytemuck::cast_slice(&data);
        let tensor =
            TensorView::new(safetensors::Dtype::F32, vec![2, 2], bytes).expect("valid tensor view");
        let tensors = HashMap::from([("fc.weight".to_string(), tensor)]);
        let serialized = serialize(&tensors, &None).expect("serialize");

        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&serialized).expect("write");
        file
    }

    #[test]
    fn test_load_tensors_keeps_shapes() {
        let file = write_test_safetensors();
        let tensors = load_tensors(file.path(), &Device::Cpu);
        assert!(tensors.is_ok_and(|t| t.get("fc.weight").is_some_and(|w| w.dims() == [2, 2])));
    }

    #[test]
    fn test_load_safetensors_missing_file() {
        let result = load_safetensors("/nonexistent/path.safetensors", &Device::Cpu);
        assert!(result.is_err());
    }

    #[test]
    fn test_lazy_model_defers_loading() {
        fn build(vb: VarBuilder) -> Result<Tensor> {
            Ok(vb.get((2, 2), "fc.weight")?)
        }
        let file = write_test_safetensors();
        let lazy = LazyModel::new(file.path(), Device::Cpu, build);
        assert!(!lazy.is_loaded());
        assert!(lazy.get().is_ok());
        assert!(lazy.is_loaded());
    }
}
