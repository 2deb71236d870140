use crate::embeddings::{Device, Embedder, EmbedderOptions, Embeddings};
use crate::error::RagError;
use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use std::fs;
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

const MAX_SEQUENCE_LENGTH: usize = 512;
const ENCODE_BATCH: usize = 32;

/// Sentence-transformer style BERT encoder: mean pooling over the attention
/// mask followed by L2 normalisation.
///
/// The model directory must hold `config.json`, `tokenizer.json` and
/// `model.safetensors`.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: candle_core::Device,
    dimensions: usize,
}

impl SentenceEmbedder {
    pub fn load(options: &EmbedderOptions) -> Result<Self, RagError> {
        let model_dir = options.model_dir.as_deref().ok_or_else(|| {
            RagError::ModelUnavailable(format!(
                "no model directory configured for {}",
                options.model_name
            ))
        })?;
        let device = select_device(options.device)?;

        let config: Config = serde_json::from_str(&read_model_file(model_dir, "config.json")?)?;
        let mut tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|error| RagError::ModelUnavailable(format!("tokenizer: {error}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..TruncationParams::default()
            }))
            .map_err(|error| RagError::ModelUnavailable(format!("tokenizer: {error}")))?;

        let weights = model_dir.join("model.safetensors");
        if !weights.is_file() {
            return Err(RagError::ModelUnavailable(format!(
                "missing {}",
                weights.display()
            )));
        }
        // SAFETY: the weights file is memory-mapped read-only and not
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DTYPE, &device) }
            .map_err(unavailable)?;
        let model = BertModel::load(vb, &config).map_err(unavailable)?;

        tracing::info!(
            model = %options.model_name,
            device = %options.device,
            dimensions = config.hidden_size,
            "sentence embedder ready"
        );
        Ok(Self {
            model,
            tokenizer,
            device,
            dimensions: config.hidden_size,
        })
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|error| RagError::GenerationFailed(format!("tokenize: {error}")))?;

        let ids = encodings
            .iter()
            .map(|encoding| Tensor::new(encoding.get_ids(), &self.device))
            .collect::<Result<Vec<_>, _>>()
            .map_err(failed)?;
        let masks = encodings
            .iter()
            .map(|encoding| Tensor::new(encoding.get_attention_mask(), &self.device))
            .collect::<Result<Vec<_>, _>>()
            .map_err(failed)?;

        let ids = Tensor::stack(&ids, 0).map_err(failed)?;
        let mask = Tensor::stack(&masks, 0).map_err(failed)?;
        let type_ids = ids.zeros_like().map_err(failed)?;

        let hidden = self
            .model
            .forward(&ids, &type_ids, Some(&mask))
            .map_err(failed)?;
        mean_pool_normalised(&hidden, &mask)
            .and_then(|pooled| pooled.to_vec2::<f32>())
            .map_err(failed)
    }
}

impl Embedder for SentenceEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn generate(&self, texts: &[String]) -> Result<Embeddings, RagError> {
        let mut rows = Vec::with_capacity(texts.len());
        for batch in texts.chunks(ENCODE_BATCH) {
            rows.extend(self.encode_batch(batch)?);
        }
        let embeddings = Embeddings::from_rows(self.dimensions, rows)?;
        tracing::debug!(shape = ?embeddings.shape(), "encoded texts");
        Ok(embeddings)
    }
}

fn select_device(device: Device) -> Result<candle_core::Device, RagError> {
    match device {
        Device::Cpu => Ok(candle_core::Device::Cpu),
        Device::Accelerated => {
            if candle_core::utils::cuda_is_available() {
                candle_core::Device::new_cuda(0).map_err(unavailable)
            } else if candle_core::utils::metal_is_available() {
                candle_core::Device::new_metal(0).map_err(unavailable)
            } else {
                Err(RagError::ModelUnavailable(
                    "no cuda or metal device available".to_string(),
                ))
            }
        }
    }
}

fn mean_pool_normalised(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.maximum(1e-9)?;
    let mean = summed.broadcast_div(&counts)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
    mean.broadcast_div(&norm)?.to_dtype(DType::F32)
}

fn read_model_file(model_dir: &Path, name: &str) -> Result<String, RagError> {
    fs::read_to_string(model_dir.join(name))
        .map_err(|error| RagError::ModelUnavailable(format!("{name}: {error}")))
}

fn unavailable(error: candle_core::Error) -> RagError {
    RagError::ModelUnavailable(error.to_string())
}

fn failed(error: candle_core::Error) -> RagError {
    RagError::GenerationFailed(error.to_string())
}
