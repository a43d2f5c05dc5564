use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tch::{CModule, Device, Kind, Tensor};

use super::tensor::{INPUT_SIZE, ModelInput};
use super::{ClassifierModel, EmbeddingModel, InferenceError, Precision};

/// TorchScript module. A half-precision copy is kept only on CUDA; on CPU
/// reduced precision runs the full-precision module.
pub struct TorchModel {
    name: String,
    device: Device,
    full: Mutex<CModule>,
    half: Option<Mutex<CModule>>,
    outputs: usize,
}

impl TorchModel {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let load_err = |e: tch::TchError| InferenceError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let device = Device::cuda_if_available();
        let full = CModule::load_on_device(path, device).map_err(load_err)?;

        let half = if device.is_cuda() {
            let mut module = CModule::load_on_device(path, device).map_err(load_err)?;
            module.to(device, Kind::Half, false);
            Some(Mutex::new(module))
        } else {
            None
        };

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("torchscript")
            .to_string();

        let mut model = Self {
            name,
            device,
            full: Mutex::new(full),
            half,
            outputs: 0,
        };
        let side = INPUT_SIZE as usize;
        let sample = ModelInput::zeros((1, 3, side, side));
        model.outputs = model.forward(&sample, Precision::Full)?.len();
        log::info!(
            "Loaded TorchScript model '{}' on {:?} ({} outputs)",
            model.name,
            device,
            model.outputs
        );
        Ok(model)
    }

    fn forward(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data)
            .view(shape.as_slice())
            .to_device(self.device);

        let output = tch::no_grad(|| match (&self.half, precision) {
            (Some(half), Precision::Reduced) => {
                let module = half.lock().unwrap_or_else(PoisonError::into_inner);
                module.forward_ts(&[tensor.to_kind(Kind::Half)])
            }
            _ => {
                let module = self.full.lock().unwrap_or_else(PoisonError::into_inner);
                module.forward_ts(&[&tensor])
            }
        })
        .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let output_flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}

impl ClassifierModel for TorchModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn logits(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.forward(input, precision)
    }
}

impl EmbeddingModel for TorchModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.outputs
    }

    fn embed(&self, input: &ModelInput, precision: Precision) -> Result<Vec<f32>, InferenceError> {
        self.forward(input, precision)
    }
}
