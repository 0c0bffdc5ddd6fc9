//! Checkpoint configuration and its resolution into [`ModelMetadata`].

use super::metadata::{ModelMetadata, NO_END_TOKEN};
use crate::dtype::DType;
use crate::error::{LlaisysError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default precision label when a checkpoint does not declare one.
pub const DEFAULT_TORCH_DTYPE: &str = "bfloat16";
/// Default RMS norm epsilon.
pub const DEFAULT_RMS_NORM_EPS: f64 = 1e-6;
/// Default rotary embedding base.
pub const DEFAULT_ROPE_THETA: f64 = 10000.0;

/// End-of-sequence declaration: a single id or a list of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EosTokenId {
    /// One id.
    Single(i64),
    /// Several ids; the first one stops generation.
    List(Vec<i64>),
}

impl EosTokenId {
    /// The id generation stops on, or [`NO_END_TOKEN`] for an empty list.
    pub fn first(&self) -> i64 {
        match self {
            Self::Single(id) => *id,
            Self::List(ids) => ids.first().copied().unwrap_or(NO_END_TOKEN),
        }
    }
}

/// Hyperparameters as declared in a checkpoint's `config.json`.
///
/// Every key is optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Declared compute precision.
    pub torch_dtype: Option<String>,
    /// Number of layers.
    pub num_hidden_layers: Option<usize>,
    /// Hidden dimension.
    pub hidden_size: Option<usize>,
    /// Number of attention heads.
    pub num_attention_heads: Option<usize>,
    /// Number of KV heads (for GQA).
    pub num_key_value_heads: Option<usize>,
    /// Explicit head dimension.
    pub head_dim: Option<usize>,
    /// Intermediate dimension (FFN).
    pub intermediate_size: Option<usize>,
    /// Maximum sequence length.
    pub max_position_embeddings: Option<usize>,
    /// Vocabulary size.
    pub vocab_size: Option<usize>,
    /// RMS norm epsilon.
    pub rms_norm_eps: Option<f64>,
    /// Rope theta.
    pub rope_theta: Option<f64>,
    /// End-of-sequence token id(s).
    pub eos_token_id: Option<EosTokenId>,
    /// Output embedding shares the input embedding tensor.
    pub tie_word_embeddings: Option<bool>,
    /// Model architecture type.
    pub model_type: Option<String>,
}

/// Metadata plus the hints the weight mapper needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Engine metadata.
    pub metadata: ModelMetadata,
    /// Precision label as declared (lowercased).
    pub source_dtype: String,
    /// Wide 16-bit tensors must be converted to f16 on load.
    pub downcast: bool,
    /// Input embedding also fills the output embedding slot.
    pub tie_word_embeddings: bool,
}

impl CheckpointConfig {
    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Derive engine metadata from the declared values.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let source_dtype = self
            .torch_dtype
            .as_deref()
            .unwrap_or(DEFAULT_TORCH_DTYPE)
            .to_ascii_lowercase();
        let (dtype, downcast) = DType::from_label(&source_dtype);

        let nlayer = self.num_hidden_layers.unwrap_or(0);
        let hs = self.hidden_size.unwrap_or(0);
        let nh = self.num_attention_heads.unwrap_or(0);
        let nkvh = self.num_key_value_heads.unwrap_or(nh);
        let dh = match self.head_dim {
            Some(dh) => dh,
            None if nh > 0 => hs / nh,
            None => {
                return Err(LlaisysError::Config(
                    "head_dim is not declared and cannot be derived with zero attention heads"
                        .into(),
                ))
            }
        };

        let metadata = ModelMetadata {
            dtype,
            nlayer,
            hs,
            nh,
            nkvh,
            dh,
            di: self.intermediate_size.unwrap_or(0),
            maxseq: self.max_position_embeddings.unwrap_or(0),
            voc: self.vocab_size.unwrap_or(0),
            epsilon: self.rms_norm_eps.unwrap_or(DEFAULT_RMS_NORM_EPS) as f32,
            theta: self.rope_theta.unwrap_or(DEFAULT_ROPE_THETA) as f32,
            end_token: self
                .eos_token_id
                .as_ref()
                .map_or(NO_END_TOKEN, EosTokenId::first),
        };

        info!(
            model_type = self.model_type.as_deref().unwrap_or("unknown"),
            nlayer = metadata.nlayer,
            hs = metadata.hs,
            nh = metadata.nh,
            nkvh = metadata.nkvh,
            attention = if metadata.is_gqa() { "GQA" } else { "MHA" },
            dh = metadata.dh,
            di = metadata.di,
            voc = metadata.voc,
            maxseq = metadata.maxseq,
            theta = metadata.theta,
            epsilon = metadata.epsilon,
            end_token = metadata.end_token,
            dtype = %metadata.dtype,
            source_dtype = %source_dtype,
            downcast,
            "resolved model config"
        );

        Ok(ResolvedConfig {
            metadata,
            source_dtype,
            downcast,
            tie_word_embeddings: self.tie_word_embeddings.unwrap_or(false),
        })
    }
}

impl ResolvedConfig {
    /// Read and resolve a `config.json`.
    pub fn from_file(path: &Path) -> Result<Self> {
        CheckpointConfig::from_file(path)?.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(json: &str) -> Result<ResolvedConfig> {
        CheckpointConfig::from_json(json)?.resolve()
    }

    const QWEN2_1_5B: &str = r#"{
        "architectures": ["Qwen2ForCausalLM"],
        "bos_token_id": 151643,
        "eos_token_id": 151643,
        "hidden_size": 1536,
        "intermediate_size": 8960,
        "max_position_embeddings": 131072,
        "model_type": "qwen2",
        "num_attention_heads": 12,
        "num_hidden_layers": 28,
        "num_key_value_heads": 2,
        "rms_norm_eps": 1e-06,
        "rope_theta": 10000,
        "tie_word_embeddings": false,
        "torch_dtype": "bfloat16",
        "vocab_size": 151936
    }"#;

    #[test]
    fn resolves_qwen2_config() {
        let resolved = resolve(QWEN2_1_5B).unwrap();
        let meta = &resolved.metadata;
        assert_eq!(meta.nlayer, 28);
        assert_eq!(meta.hs, 1536);
        assert_eq!(meta.nh, 12);
        assert_eq!(meta.nkvh, 2);
        assert_eq!(meta.dh, 128);
        assert_eq!(meta.di, 8960);
        assert_eq!(meta.maxseq, 131072);
        assert_eq!(meta.voc, 151936);
        assert_eq!(meta.end_token, 151643);
        assert_eq!(meta.dtype, DType::F16);
        assert!(resolved.downcast);
        assert!(!resolved.tie_word_embeddings);
        meta.validate().unwrap();
    }

    #[test]
    fn head_dim_is_floor_division() {
        for (hs, nh) in [(10, 3), (64, 8), (7, 7), (5, 8)] {
            let json = format!(r#"{{"hidden_size": {hs}, "num_attention_heads": {nh}}}"#);
            assert_eq!(resolve(&json).unwrap().metadata.dh, hs / nh);
        }
    }

    #[test]
    fn explicit_head_dim_wins() {
        let json = r#"{"hidden_size": 64, "num_attention_heads": 8, "head_dim": 16}"#;
        assert_eq!(resolve(json).unwrap().metadata.dh, 16);
    }

    #[test]
    fn zero_heads_without_head_dim_fails() {
        let result = resolve(r#"{"hidden_size": 64}"#);
        assert!(matches!(result, Err(LlaisysError::Config(_))));
    }

    #[test]
    fn zero_heads_with_explicit_head_dim_resolves_but_fails_validation() {
        let resolved = resolve(r#"{"hidden_size": 64, "head_dim": 8, "vocab_size": 4}"#).unwrap();
        assert!(matches!(
            resolved.metadata.validate(),
            Err(LlaisysError::Config(_))
        ));
    }

    #[test]
    fn kv_heads_default_to_heads() {
        let json = r#"{"hidden_size": 64, "num_attention_heads": 8}"#;
        let meta = resolve(json).unwrap().metadata;
        assert_eq!(meta.nkvh, 8);
        assert!(!meta.is_gqa());
    }

    #[test]
    fn end_token_forms() {
        let base = r#""hidden_size": 8, "num_attention_heads": 2"#;
        let end = |eos: &str| {
            resolve(&format!("{{{base}, \"eos_token_id\": {eos}}}"))
                .unwrap()
                .metadata
                .end_token
        };
        assert_eq!(end("7"), 7);
        assert_eq!(end("[2, 3]"), 2);
        assert_eq!(end("[]"), NO_END_TOKEN);
        assert_eq!(end("null"), NO_END_TOKEN);

        let missing = resolve(&format!("{{{base}}}")).unwrap();
        assert_eq!(missing.metadata.end_token, NO_END_TOKEN);
    }

    #[test]
    fn dtype_table() {
        let dtype = |label: &str| {
            let json = format!(
                r#"{{"hidden_size": 8, "num_attention_heads": 2, "torch_dtype": "{label}"}}"#
            );
            let resolved = resolve(&json).unwrap();
            (resolved.metadata.dtype, resolved.downcast)
        };
        assert_eq!(dtype("float32"), (DType::F32, false));
        assert_eq!(dtype("fp32"), (DType::F32, false));
        assert_eq!(dtype("f32"), (DType::F32, false));
        assert_eq!(dtype("float16"), (DType::F16, false));
        assert_eq!(dtype("fp16"), (DType::F16, false));
        assert_eq!(dtype("f16"), (DType::F16, false));
        assert_eq!(dtype("bfloat16"), (DType::F16, true));

        let absent = resolve(r#"{"hidden_size": 8, "num_attention_heads": 2}"#).unwrap();
        assert_eq!(absent.metadata.dtype, DType::F16);
        assert!(absent.downcast);
        assert_eq!(absent.source_dtype, "bfloat16");
    }

    #[test]
    fn scalar_defaults() {
        let meta = resolve(r#"{"hidden_size": 8, "num_attention_heads": 2}"#)
            .unwrap()
            .metadata;
        assert_eq!(meta.nlayer, 0);
        assert_eq!(meta.di, 0);
        assert_eq!(meta.voc, 0);
        assert!((meta.epsilon - 1e-6).abs() < 1e-12);
        assert_eq!(meta.theta, 10000.0);
    }

    #[test]
    fn malformed_json_is_serde_error() {
        assert!(matches!(
            CheckpointConfig::from_json("{not json"),
            Err(LlaisysError::Serde(_))
        ));
    }

    #[test]
    fn from_nonexistent_file() {
        let result = ResolvedConfig::from_file(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(LlaisysError::Io(_))));
    }
}
