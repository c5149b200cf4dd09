//! Local transformer embeddings for the code and summary spaces.
//!
//! Each space has its own BERT-family encoder loaded with candle. The
//! embedding of a text is the final hidden state at the first token
//! position (the CLS/`<s>` token), with input truncated to the configured
//! token limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use candle_transformers::models::xlm_roberta::{Config as RobertaConfig, XLMRobertaModel};
use hf_hub::api::sync::ApiBuilder;
use s0_core::{EmbeddingConfig, EmbeddingSpace, S0Error};
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::processors::roberta::RobertaProcessing;
use tokenizers::{Tokenizer, TruncationParams};

/// Maps text to a fixed-length vector in one embedding space.
///
/// Inference is CPU-bound and synchronous; async callers go through
/// [`EmbeddingProvider::embed_query`].
pub trait Embedder: Send + Sync {
    /// Embed `text`. Empty text is valid input.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] if tokenization or inference fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>, S0Error>;

    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;
}

enum TokenizerFiles {
    Json(PathBuf),
    Bpe { vocab: PathBuf, merges: PathBuf },
}

struct ModelFiles {
    config: PathBuf,
    weights: PathBuf,
    tokenizer: TokenizerFiles,
}

/// Transformer stack selected by the checkpoint's `model_type`.
///
/// RoBERTa checkpoints number positions from `pad_token_id + 1`, so they run
/// through the RoBERTa embeddings rather than the BERT ones.
enum Encoder {
    Bert(BertModel),
    Roberta(XLMRobertaModel),
}

impl Encoder {
    fn name(&self) -> &'static str {
        match self {
            Encoder::Bert(_) => "bert",
            Encoder::Roberta(_) => "roberta",
        }
    }
}

/// BERT/RoBERTa encoder with first-position pooling.
///
/// # Examples
///
/// ```no_run
/// use s0_lens::embedding::{BertEmbedder, Embedder};
///
/// let embedder = BertEmbedder::load("bert-base-uncased", None, 512, 768).unwrap();
/// let vector = embedder.embed("responsive navigation bar").unwrap();
/// assert_eq!(vector.len(), 768);
/// ```
pub struct BertEmbedder {
    model_id: String,
    encoder: Encoder,
    tokenizer: Tokenizer,
    device: Device,
    dimensions: usize,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("model_id", &self.model_id)
            .field("architecture", &self.encoder.name())
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl BertEmbedder {
    /// Load a model from a local directory or the Hugging Face hub.
    ///
    /// `model` is treated as a directory when one exists at that path,
    /// otherwise as a hub repo id. Weights are read from
    /// `model.safetensors`, falling back to `pytorch_model.bin`. The
    /// tokenizer comes from `tokenizer.json`, falling back to a byte-level
    /// BPE built from `vocab.json` and `merges.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] if any model file is missing or fails
    /// to load.
    pub fn load(
        model: &str,
        cache_dir: Option<&Path>,
        max_tokens: usize,
        dimensions: usize,
    ) -> Result<Self, S0Error> {
        let files = resolve_files(model, cache_dir)?;
        let device = Device::Cpu;

        let config_text = std::fs::read_to_string(&files.config)
            .map_err(|e| S0Error::Embedding(format!("failed to read {model} config: {e}")))?;
        let config: serde_json::Value = serde_json::from_str(&config_text)
            .map_err(|e| S0Error::Embedding(format!("invalid {model} config: {e}")))?;

        let vb = if files.weights.extension().is_some_and(|ext| ext == "safetensors") {
            let data = std::fs::read(&files.weights)
                .map_err(|e| S0Error::Embedding(format!("failed to read {model} weights: {e}")))?;
            VarBuilder::from_buffered_safetensors(data, DTYPE, &device)
        } else {
            VarBuilder::from_pth(&files.weights, DTYPE, &device)
        }
        .map_err(|e| S0Error::Embedding(format!("failed to load {model} weights: {e}")))?;

        let encoder = build_encoder(config, vb)
            .map_err(|e| S0Error::Embedding(format!("failed to build {model}: {e}")))?;

        let mut tokenizer = match &files.tokenizer {
            TokenizerFiles::Json(path) => Tokenizer::from_file(path).map_err(|e| {
                S0Error::Embedding(format!("failed to load {model} tokenizer: {e}"))
            })?,
            TokenizerFiles::Bpe { vocab, merges } => byte_level_bpe(vocab, merges)?,
        };
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| S0Error::Embedding(format!("invalid truncation settings: {e}")))?;

        tracing::info!(
            model,
            architecture = encoder.name(),
            max_tokens,
            dimensions,
            "loaded embedding model"
        );
        Ok(Self {
            model_id: model.to_string(),
            encoder,
            tokenizer,
            device,
            dimensions,
        })
    }

    fn first_position(&self, ids: &[u32], mask: &[u32]) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = Tensor::new(mask, &self.device)?.unsqueeze(0)?;
        let hidden = match &self.encoder {
            Encoder::Bert(model) => {
                model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?
            }
            Encoder::Roberta(model) => model.forward(
                &input_ids,
                &attention_mask,
                &token_type_ids,
                None,
                None,
                None,
            )?,
        };
        hidden.i((0, 0))?.to_dtype(DType::F32)?.to_vec1::<f32>()
    }
}

impl Embedder for BertEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, S0Error> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| S0Error::Embedding(format!("tokenization failed: {e}")))?;

        let vector = self
            .first_position(encoding.get_ids(), encoding.get_attention_mask())
            .map_err(|e| S0Error::Embedding(format!("{} inference failed: {e}", self.model_id)))?;

        if vector.len() != self.dimensions {
            return Err(S0Error::Embedding(format!(
                "{} produced {} dimensions, expected {}",
                self.model_id,
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn build_encoder(mut config: serde_json::Value, vb: VarBuilder) -> Result<Encoder, String> {
    let model_type = config
        .get("model_type")
        .and_then(|v| v.as_str())
        .unwrap_or("bert")
        .to_string();

    match model_type.as_str() {
        "roberta" | "xlm-roberta" => {
            // Older RoBERTa configs omit this key.
            if let Some(fields) = config.as_object_mut() {
                fields
                    .entry("position_embedding_type")
                    .or_insert_with(|| "absolute".into());
            }
            let config: RobertaConfig =
                serde_json::from_value(config).map_err(|e| format!("invalid config: {e}"))?;
            let vb = if vb.contains_tensor("embeddings.word_embeddings.weight") {
                vb
            } else {
                vb.pp("roberta")
            };
            XLMRobertaModel::new(&config, vb)
                .map(Encoder::Roberta)
                .map_err(|e| e.to_string())
        }
        _ => {
            let config: BertConfig =
                serde_json::from_value(config).map_err(|e| format!("invalid config: {e}"))?;
            BertModel::load(vb, &config)
                .map(Encoder::Bert)
                .map_err(|e| e.to_string())
        }
    }
}

fn resolve_files(model: &str, cache_dir: Option<&Path>) -> Result<ModelFiles, S0Error> {
    let local = Path::new(model);
    let fetch: Box<dyn Fn(&str) -> Option<PathBuf>> = if local.is_dir() {
        let dir = local.to_path_buf();
        Box::new(move |name| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        })
    } else {
        let mut builder = ApiBuilder::new();
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir.to_path_buf());
        }
        let api = builder
            .build()
            .map_err(|e| S0Error::Embedding(format!("failed to init model hub client: {e}")))?;
        let repo = api.model(model.to_string());
        Box::new(move |name| match repo.get(name) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!(file = name, error = %e, "model file not available");
                None
            }
        })
    };

    let missing = |what: &str| S0Error::Embedding(format!("model {model} has no {what}"));

    let config = fetch("config.json").ok_or_else(|| missing("config.json"))?;
    let weights = fetch("model.safetensors")
        .or_else(|| fetch("pytorch_model.bin"))
        .ok_or_else(|| missing("model.safetensors or pytorch_model.bin"))?;
    let tokenizer = match fetch("tokenizer.json") {
        Some(path) => TokenizerFiles::Json(path),
        None => TokenizerFiles::Bpe {
            vocab: fetch("vocab.json").ok_or_else(|| missing("tokenizer.json or vocab.json"))?,
            merges: fetch("merges.txt").ok_or_else(|| missing("merges.txt"))?,
        },
    };

    Ok(ModelFiles {
        config,
        weights,
        tokenizer,
    })
}

fn byte_level_bpe(vocab: &Path, merges: &Path) -> Result<Tokenizer, S0Error> {
    let bpe = BPE::from_file(&vocab.to_string_lossy(), &merges.to_string_lossy())
        .build()
        .map_err(|e| S0Error::Embedding(format!("failed to build BPE tokenizer: {e}")))?;

    let mut tokenizer = Tokenizer::new(bpe);
    let cls = tokenizer.token_to_id("<s>").unwrap_or(0);
    let sep = tokenizer.token_to_id("</s>").unwrap_or(2);
    tokenizer
        .with_pre_tokenizer(Some(ByteLevel::new(false, true, true)))
        .with_post_processor(Some(RobertaProcessing::new(
            ("</s>".to_string(), sep),
            ("<s>".to_string(), cls),
        )))
        .with_decoder(Some(ByteLevel::default()));
    Ok(tokenizer)
}

/// The pair of embedders, one per space, shared across requests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use s0_core::{EmbeddingSpace, S0Error};
/// use s0_lens::embedding::{Embedder, EmbeddingProvider};
///
/// struct Constant(f32);
///
/// impl Embedder for Constant {
///     fn embed(&self, _text: &str) -> Result<Vec<f32>, S0Error> {
///         Ok(vec![self.0; 2])
///     }
///     fn dimensions(&self) -> usize {
///         2
///     }
/// }
///
/// let provider = EmbeddingProvider::new(Arc::new(Constant(1.0)), Arc::new(Constant(0.5)));
/// assert_eq!(provider.embed_summary("x").unwrap(), vec![0.5, 0.5]);
/// assert_eq!(provider.embedder(EmbeddingSpace::Code).dimensions(), 2);
/// ```
#[derive(Clone)]
pub struct EmbeddingProvider {
    code: Arc<dyn Embedder>,
    summary: Arc<dyn Embedder>,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("code_dimensions", &self.code.dimensions())
            .field("summary_dimensions", &self.summary.dimensions())
            .finish()
    }
}

impl EmbeddingProvider {
    /// Pair two embedders.
    pub fn new(code: Arc<dyn Embedder>, summary: Arc<dyn Embedder>) -> Self {
        Self { code, summary }
    }

    /// Load both models from an [`EmbeddingConfig`].
    ///
    /// This blocks while models download and load.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] if either model fails to load.
    pub fn load(config: &EmbeddingConfig) -> Result<Self, S0Error> {
        let cache_dir = config.cache_dir.as_deref();
        let code = BertEmbedder::load(
            &config.code_model,
            cache_dir,
            config.max_tokens,
            config.dimensions,
        )?;
        let summary = BertEmbedder::load(
            &config.summary_model,
            cache_dir,
            config.max_tokens,
            config.dimensions,
        )?;
        Ok(Self::new(Arc::new(code), Arc::new(summary)))
    }

    /// The embedder for `space`.
    pub fn embedder(&self, space: EmbeddingSpace) -> &Arc<dyn Embedder> {
        match space {
            EmbeddingSpace::Code => &self.code,
            EmbeddingSpace::Summary => &self.summary,
        }
    }

    /// Embed text in the code space.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] on inference failure.
    pub fn embed_code(&self, text: &str) -> Result<Vec<f32>, S0Error> {
        self.code.embed(text)
    }

    /// Embed text in the summary space.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] on inference failure.
    pub fn embed_summary(&self, text: &str) -> Result<Vec<f32>, S0Error> {
        self.summary.embed(text)
    }

    /// Embed `query` in `space` on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] on inference failure or if the
    /// blocking task panics.
    pub async fn embed_query(&self, space: EmbeddingSpace, query: &str) -> Result<Vec<f32>, S0Error> {
        let embedder = Arc::clone(self.embedder(space));
        let text = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| S0Error::Embedding(format!("{space} embedding task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    const TINY_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2]},
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "[UNK]": 0, "[PAD]": 1, "[CLS]": 2, "[SEP]": 3,
                "button": 4, "form": 5, "card": 6, "modal": 7, "input": 8, "grid": 9
            },
            "unk_token": "[UNK]"
        }
    }"#;

    fn tiny_config(model_type: &str) -> serde_json::Value {
        serde_json::json!({
            "model_type": model_type,
            "vocab_size": 16,
            "hidden_size": 8,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "attention_probs_dropout_prob": 0.0,
            "max_position_embeddings": 16,
            "type_vocab_size": 1,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 1
        })
    }

    /// Random weights in BERT layout, which RoBERTa shares.
    fn write_tiny_model(dir: &Path, model_type: &str) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        build_encoder(tiny_config("bert"), vb).unwrap();
        varmap.save(dir.join("model.safetensors")).unwrap();
        std::fs::write(dir.join("tokenizer.json"), TINY_TOKENIZER).unwrap();
        std::fs::write(dir.join("config.json"), tiny_config(model_type).to_string()).unwrap();
    }

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, S0Error> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, S0Error> {
            Err(S0Error::Embedding("model unavailable".into()))
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn embed_query_routes_by_space() {
        let provider = EmbeddingProvider::new(Arc::new(LengthEmbedder), Arc::new(FailingEmbedder));

        let code = provider
            .embed_query(EmbeddingSpace::Code, "abc")
            .await
            .unwrap();
        assert_eq!(code, vec![3.0, 1.0]);

        let err = provider
            .embed_query(EmbeddingSpace::Summary, "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, S0Error::Embedding(_)));
    }

    #[test]
    fn empty_text_is_embedded() {
        let provider = EmbeddingProvider::new(Arc::new(LengthEmbedder), Arc::new(LengthEmbedder));
        assert_eq!(provider.embed_code("").unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn local_dir_without_config_is_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().to_string_lossy().to_string();
        let err = BertEmbedder::load(&model, None, 512, 768).unwrap_err();
        assert!(matches!(err, S0Error::Embedding(_)));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn local_dir_without_weights_is_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let model = dir.path().to_string_lossy().to_string();
        let err = BertEmbedder::load(&model, None, 512, 768).unwrap_err();
        assert!(err.to_string().contains("pytorch_model.bin"));
    }

    #[test]
    fn long_input_is_truncated_to_max_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_model(dir.path(), "bert");
        let model = dir.path().to_string_lossy().to_string();
        let embedder = BertEmbedder::load(&model, None, 8, 8).unwrap();

        let head = "button form card modal input grid";
        let long = format!("{head} {}", "card modal ".repeat(40));
        let truncated = embedder.embed(&long).unwrap();

        assert_eq!(truncated.len(), 8);
        assert!(truncated.iter().all(|v| v.is_finite()));
        assert_eq!(truncated, embedder.embed(head).unwrap());
    }

    #[test]
    fn embedding_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_model(dir.path(), "bert");
        let model = dir.path().to_string_lossy().to_string();
        let embedder = BertEmbedder::load(&model, None, 8, 8).unwrap();

        let first = embedder.embed("modal form").unwrap();
        let second = embedder.embed("modal form").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, embedder.embed("grid card").unwrap());
    }

    #[test]
    fn hidden_size_mismatch_is_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_model(dir.path(), "bert");
        let model = dir.path().to_string_lossy().to_string();
        let embedder = BertEmbedder::load(&model, None, 8, 768).unwrap();

        let err = embedder.embed("button").unwrap_err();
        assert!(matches!(err, S0Error::Embedding(_)));
        assert!(err.to_string().contains("produced 8 dimensions"));
    }

    #[test]
    fn roberta_checkpoint_uses_roberta_positions() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_model(dir.path(), "bert");
        let model = dir.path().to_string_lossy().to_string();
        let as_bert = BertEmbedder::load(&model, None, 8, 8).unwrap();
        assert_eq!(as_bert.encoder.name(), "bert");

        std::fs::write(
            dir.path().join("config.json"),
            tiny_config("roberta").to_string(),
        )
        .unwrap();
        let as_roberta = BertEmbedder::load(&model, None, 8, 8).unwrap();
        assert_eq!(as_roberta.encoder.name(), "roberta");

        let text = "button card input";
        let roberta_vector = as_roberta.embed(text).unwrap();
        assert_eq!(roberta_vector.len(), 8);
        assert_ne!(roberta_vector, as_bert.embed(text).unwrap());
    }
}
