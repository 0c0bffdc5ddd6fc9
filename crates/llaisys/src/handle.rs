//! Loaded model handle and its builder.

use llaisys_core::{
    device::Device,
    dtype::DType,
    engine::{Engine, EngineModel, SamplingParams},
    error::{LlaisysError, Result},
    generation::{self, CancellationToken, GenerationConfig, GenerationOutput},
    model::ModelMetadata,
    weights::{Checkpoint, LoadOptions, LoadReport, WeightMapper},
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Builder for loading a [`Model`].
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    checkpoint: Option<PathBuf>,
    device: Device,
    dtype: Option<DType>,
}

impl ModelBuilder {
    /// Create a new model builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the checkpoint directory.
    pub fn checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    /// Set the device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Set the device ordinals, keeping the device type.
    pub fn device_ids(mut self, ids: Vec<i32>) -> Self {
        self.device = self.device.with_ids(ids);
        self
    }

    /// Override the compute dtype resolved from `config.json`.
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Create the model on `engine` and load every weight.
    ///
    /// A failure after the engine model exists drops it before returning.
    pub fn build_with<E: Engine>(self, engine: &E) -> Result<Model<E::Model>> {
        let dir = self
            .checkpoint
            .ok_or_else(|| LlaisysError::Config("no checkpoint directory given".into()))?;
        let checkpoint = Checkpoint::open(&dir)?;
        let config = checkpoint.config()?;

        let mut metadata = config.metadata.clone();
        if let Some(dtype) = self.dtype {
            metadata.dtype = dtype;
        }
        metadata.validate()?;

        let mut engine_model = engine.create(&metadata, &self.device)?;
        let options = LoadOptions::from(&config);
        let report = load_weights(&mut engine_model, &metadata, &checkpoint, options).map_err(|e| {
            warn!(dir = %dir.display(), error = %e, "weight load failed, releasing model");
            e
        })?;

        info!(
            dir = %dir.display(),
            device = %self.device,
            dtype = %metadata.dtype,
            slots = report.slots_written,
            "model ready"
        );
        Ok(Model {
            inner: Mutex::new(engine_model),
            metadata,
            report,
            device: self.device,
        })
    }
}

fn load_weights<M: EngineModel>(
    model: &mut M,
    metadata: &ModelMetadata,
    checkpoint: &Checkpoint,
    options: LoadOptions,
) -> Result<LoadReport> {
    let mut mapper = WeightMapper::new(model.weights(), metadata, options)?;
    mapper.load_checkpoint(checkpoint)?;
    mapper.finish()
}

/// A model with every weight loaded, ready to generate.
///
/// Generation calls on one model are serialized by an internal lock.
#[derive(Debug)]
pub struct Model<M> {
    inner: Mutex<M>,
    metadata: ModelMetadata,
    report: LoadReport,
    device: Device,
}

impl<M: EngineModel> Model<M> {
    /// Load the checkpoint at `path` on `engine`.
    pub fn construct_with<E>(engine: &E, path: impl AsRef<Path>, device: Device) -> Result<Self>
    where
        E: Engine<Model = M>,
    {
        ModelBuilder::new()
            .checkpoint(path.as_ref())
            .device(device)
            .build_with(engine)
    }

    /// Generate up to `max_new_tokens` tokens after `prompt`.
    ///
    /// Returns the prompt followed by the generated tokens.
    pub fn generate(
        &self,
        prompt: &[i64],
        max_new_tokens: usize,
        top_k: usize,
        top_p: f32,
        temperature: f32,
    ) -> Result<Vec<i64>> {
        let config = GenerationConfig {
            max_new_tokens,
            sampling: SamplingParams {
                temperature,
                top_p,
                top_k,
            },
        };
        Ok(self.generate_with(prompt, &config, None)?.tokens)
    }

    /// Generate with explicit settings and optional cancellation.
    pub fn generate_with(
        &self,
        prompt: &[i64],
        config: &GenerationConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerationOutput> {
        let mut model = self.inner.lock();
        generation::generate(&mut *model, &self.metadata, prompt, config, cancel)
    }

    /// Engine metadata the model was created with.
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Summary of the weight load.
    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// Device the model lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Unwrap the engine model.
    pub fn into_inner(self) -> M {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llaisys_core::engine::{HostEngine, HostModel, HostSlot};
    use llaisys_core::generation::StopReason;
    use llaisys_core::weights::{GlobalSlot, LayerSlot, SlotId, WeightSet};
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> String {
        serde_json::json!({
            "model_type": "qwen2",
            "hidden_size": 8,
            "intermediate_size": 16,
            "num_hidden_layers": 2,
            "num_attention_heads": 4,
            "num_key_value_heads": 2,
            "vocab_size": 32,
            "max_position_embeddings": 64,
            "eos_token_id": 3,
            "torch_dtype": "float32"
        })
        .to_string()
    }

    type Decode = fn(&[i64], &SamplingParams) -> Result<i64>;

    /// Counts up from the last token and emits 3 once it passes 12.
    fn count_up(tokens: &[i64], _: &SamplingParams) -> Result<i64> {
        let last = tokens.last().copied().unwrap_or(0);
        Ok(if last >= 12 { 3 } else { last + 1 })
    }

    fn tensor_name(id: SlotId) -> String {
        let suffix = |kind: LayerSlot| match kind {
            LayerSlot::AttnNorm => "input_layernorm.weight",
            LayerSlot::AttnQ => "self_attn.q_proj.weight",
            LayerSlot::AttnQBias => "self_attn.q_proj.bias",
            LayerSlot::AttnK => "self_attn.k_proj.weight",
            LayerSlot::AttnKBias => "self_attn.k_proj.bias",
            LayerSlot::AttnV => "self_attn.v_proj.weight",
            LayerSlot::AttnVBias => "self_attn.v_proj.bias",
            LayerSlot::AttnO => "self_attn.o_proj.weight",
            LayerSlot::MlpNorm => "post_attention_layernorm.weight",
            LayerSlot::MlpGate => "mlp.gate_proj.weight",
            LayerSlot::MlpUp => "mlp.up_proj.weight",
            LayerSlot::MlpDown => "mlp.down_proj.weight",
        };
        match id {
            SlotId::Global(GlobalSlot::InEmbed) => "model.embed_tokens.weight".into(),
            SlotId::Global(GlobalSlot::OutEmbed) => "lm_head.weight".into(),
            SlotId::Global(GlobalSlot::OutNorm) => "model.norm.weight".into(),
            SlotId::Layer { kind, layer } => format!("model.layers.{}.{}", layer, suffix(kind)),
        }
    }

    /// Write `config` and an F32 tensor for every slot except `skip`.
    fn write_checkpoint(dir: &Path, config: &str, skip: &[&str]) -> ModelMetadata {
        fs::write(dir.join("config.json"), config).unwrap();
        let meta = llaisys_core::model::CheckpointConfig::from_json(config)
            .unwrap()
            .resolve()
            .unwrap()
            .metadata;

        let ids = WeightSet::try_from_fn(meta.nlayer, Ok).unwrap();
        let tensors: Vec<(String, Vec<usize>, Vec<u8>)> = ids
            .slot_ids()
            .map(|id| (tensor_name(id), meta.slot_shape(id)))
            .filter(|(name, _)| !skip.contains(&name.as_str()))
            .map(|(name, shape)| {
                let numel: usize = shape.iter().product();
                let bytes = (0..numel).flat_map(|i| (i as f32).to_le_bytes()).collect();
                (name, shape, bytes)
            })
            .collect();
        let views: Vec<(&str, TensorView<'_>)> = tensors
            .iter()
            .map(|(name, shape, data)| {
                (name.as_str(), TensorView::new(Dtype::F32, shape.clone(), data).unwrap())
            })
            .collect();
        let path = dir.join("model.safetensors");
        safetensors::serialize_to_file(views.iter().map(|(n, v)| (*n, v)), &None, &path).unwrap();
        meta
    }

    fn engine() -> HostEngine<Decode> {
        HostEngine::new(count_up as Decode)
    }

    #[test]
    fn construct_then_generate() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &[]);

        let model = Model::construct_with(&engine(), dir.path(), Device::cpu()).unwrap();
        assert_eq!(model.metadata().nlayer, 2);
        assert_eq!(model.metadata().dtype, DType::F32);
        assert_eq!(model.load_report().slots_written, 3 + 2 * 12);

        let tokens = model.generate(&[10], 16, 1, 0.8, 0.8).unwrap();
        assert_eq!(tokens, vec![10, 11, 12, 3]);
    }

    #[test]
    fn generate_with_reports_stop_reason() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &[]);
        let model = Model::construct_with(&engine(), dir.path(), Device::cpu()).unwrap();

        let out = model
            .generate_with(&[4], &GenerationConfig::new(2), None)
            .unwrap();
        assert_eq!(out.tokens, vec![4, 5, 6]);
        assert_eq!(out.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn missing_tensor_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &["model.layers.1.mlp.gate_proj.weight"]);

        match Model::construct_with(&engine(), dir.path(), Device::cpu()) {
            Err(LlaisysError::MissingWeights(msg)) => assert!(msg.contains("mlp_gate_w[1]")),
            other => panic!("expected MissingWeights, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn directory_without_weights_is_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), config()).unwrap();

        let result = Model::construct_with(&engine(), dir.path(), Device::cpu());
        assert!(matches!(result, Err(LlaisysError::MissingWeights(_))));
    }

    #[test]
    fn builder_requires_checkpoint() {
        let result = ModelBuilder::new().build_with(&engine());
        assert!(matches!(result, Err(LlaisysError::Config(_))));
    }

    #[test]
    fn builder_dtype_override_converts_weights() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &[]);

        let model = ModelBuilder::new()
            .checkpoint(dir.path())
            .dtype(DType::F16)
            .build_with(&engine())
            .unwrap();
        assert_eq!(model.metadata().dtype, DType::F16);
        assert_eq!(model.load_report().converted, 3 + 2 * 12);

        let host = model.into_inner();
        let norm = host.weight_set().slot(SlotId::Global(GlobalSlot::OutNorm)).unwrap();
        assert_eq!(norm.data().len(), 8 * 2);
    }

    #[test]
    fn host_engine_rejects_gpu_device() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &[]);

        let result = ModelBuilder::new()
            .checkpoint(dir.path())
            .device(Device::nvidia(0))
            .device_ids(vec![0, 1])
            .build_with(&engine());
        assert!(matches!(result, Err(LlaisysError::Create(_))));
    }

    /// Engine whose models flag when they are dropped.
    struct Tracking {
        dropped: Arc<AtomicBool>,
        created: Arc<AtomicUsize>,
    }

    struct TrackedModel {
        inner: HostModel<Decode>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for TrackedModel {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl EngineModel for TrackedModel {
        type Slot = HostSlot;

        fn weights(&mut self) -> &mut WeightSet<HostSlot> {
            self.inner.weights()
        }

        fn infer(&mut self, tokens: &[i64], sampling: &SamplingParams) -> Result<i64> {
            self.inner.infer(tokens, sampling)
        }
    }

    impl Engine for Tracking {
        type Model = TrackedModel;

        fn create(&self, metadata: &ModelMetadata, device: &Device) -> Result<TrackedModel> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(TrackedModel {
                inner: engine().create(metadata, device)?,
                dropped: self.dropped.clone(),
            })
        }
    }

    #[test]
    fn failed_load_releases_engine_model() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &["model.norm.weight"]);

        let tracking = Tracking {
            dropped: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
        };
        let result = Model::construct_with(&tracking, dir.path(), Device::cpu());
        assert!(result.is_err());
        assert_eq!(tracking.created.load(Ordering::SeqCst), 1);
        assert!(tracking.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_generation_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), &config(), &[]);
        let model = Arc::new(Model::construct_with(&engine(), dir.path(), Device::cpu()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || model.generate(&[4 + i], 3, 1, 1.0, 1.0).unwrap())
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let start = 4 + i as i64;
            assert_eq!(handle.join().unwrap(), vec![start, start + 1, start + 2, start + 3]);
        }
    }
}
