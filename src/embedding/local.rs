//! Local transformer embeddings via candle.
//!
//! Loads a BERT-family model from the HuggingFace Hub and runs it in-process. Sentences are
//! padded and truncated to 512 tokens; the sentence vector is the attention-masked mean of
//! the last hidden states, `sum(hidden * mask) / max(sum(mask), 1e-9)`.

use crate::embedding::EmbeddingError;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

const MAX_SEQUENCE_LENGTH: usize = 512;

/// In-process BERT embedder with attention-masked mean pooling.
pub struct LocalEmbedder {
    tokenizer: Tokenizer,
    model: BertModel,
    device: Device,
}

impl LocalEmbedder {
    /// Download (or reuse) the model files from the hub and load them onto the selected
    /// device. `device_override` accepts `cpu` or `cuda`; without it the accelerator is
    /// auto-detected.
    pub fn load(model_id: &str, device_override: Option<&str>) -> Result<Self, EmbeddingError> {
        let device = select_device(device_override)?;
        tracing::info!(model = model_id, device = ?device, "Loading local embedding model");

        let api = hf_hub::api::sync::Api::new()
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;
        let repo = api.model(model_id.to_string());
        let config_path = repo
            .get("config.json")
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(config_path)
                .map_err(|err| EmbeddingError::Model(err.to_string()))?,
        )
        .map_err(|err| EmbeddingError::Model(err.to_string()))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|err| EmbeddingError::Model(err.to_string()))?
        };
        let model =
            BertModel::load(vb, &config).map_err(|err| EmbeddingError::Model(err.to_string()))?;
        tracing::info!(model = model_id, "Local embedding model loaded");

        Ok(Self {
            tokenizer,
            model,
            device,
        })
    }

    /// Produce one pooled vector per input text.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;

        let mut id_rows = Vec::with_capacity(encodings.len());
        let mut mask_rows = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            id_rows.push(
                Tensor::new(encoding.get_ids(), &self.device)
                    .map_err(|err| EmbeddingError::Model(err.to_string()))?,
            );
            mask_rows.push(
                Tensor::new(encoding.get_attention_mask(), &self.device)
                    .map_err(|err| EmbeddingError::Model(err.to_string()))?,
            );
        }
        let token_ids = Tensor::stack(&id_rows, 0)
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;
        let attention_mask = Tensor::stack(&mask_rows, 0)
            .map_err(|err| EmbeddingError::Model(err.to_string()))?;

        self.pool(&token_ids, &attention_mask)
            .map_err(|err| EmbeddingError::Model(err.to_string()))
    }

    fn pool(
        &self,
        token_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Vec<Vec<f32>>, candle_core::Error> {
        let token_type_ids = token_ids.zeros_like()?;
        let hidden = self
            .model
            .forward(token_ids, &token_type_ids, Some(attention_mask))?;

        // [batch, tokens, 1] mask expanded over the hidden dimension.
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::INFINITY)?;
        let pooled = summed.broadcast_div(&counts)?;
        pooled.to_vec2::<f32>()
    }
}

fn select_device(device_override: Option<&str>) -> Result<Device, EmbeddingError> {
    match device_override.map(str::to_lowercase).as_deref() {
        Some("cpu") => Ok(Device::Cpu),
        Some("cuda") => Device::new_cuda(0).map_err(|err| EmbeddingError::Model(err.to_string())),
        Some(other) => Err(EmbeddingError::Model(format!(
            "unsupported EMBEDDING_DEVICE '{other}'; expected 'cpu' or 'cuda'"
        ))),
        None => Ok(Device::new_cuda(0).unwrap_or(Device::Cpu)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_cpu_override_is_honored() {
        let device = select_device(Some("cpu")).expect("cpu device");
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn unknown_device_name_is_rejected() {
        let error = select_device(Some("tpu")).unwrap_err();
        assert!(matches!(error, EmbeddingError::Model(message) if message.contains("tpu")));
    }
}
