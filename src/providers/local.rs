// Local Candle backend
// A small causal language model (embedding -> feed-forward -> head) with an
// optional low-rank adapter on the targeted modules. Stands in for the
// external sharded stack in single-process runs and in tests; it holds every
// "shard" itself, so its consolidation save is a trivial gather.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{
    embedding, linear, loss, ops, AdamW, Embedding, Init, Linear, Module, Optimizer, ParamsAdamW,
    VarBuilder, VarMap,
};
use std::fs;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::{AdapterConfig, ModelConfig, OptimizerConfig};
use crate::errors::adapter_target_error;
use crate::persistence::ModelPersistence;
use crate::sampling::GenerationEngine;
use crate::training::TrainerState;

use super::dataset::Batch;
use super::model::{ModelProvider, StepOutcome};

const WEIGHTS_FILE: &str = "model.safetensors";
const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
const MAX_NEW_TOKENS: usize = 16;

/// Modules an adapter may attach to
const TARGET_MODULES: &[&str] = &["ff", "head"];

/// Low-rank update on one linear module: x @ A @ B, scaled by alpha / rank
struct LowRank {
    a: Tensor,
    b: Tensor,
    scale: f64,
    dropout: f64,
}

impl LowRank {
    fn init(vb: &VarBuilder, in_dim: usize, out_dim: usize, config: &AdapterConfig) -> Result<Self> {
        let a = vb.get_with_hints(
            (in_dim, config.rank),
            "a",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        // B starts at zero so the adapter is a no-op until trained
        let b = vb.get_with_hints((config.rank, out_dim), "b", Init::Const(0.0))?;
        Ok(Self {
            a,
            b,
            scale: config.alpha / config.rank as f64,
            dropout: config.dropout,
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = if train && self.dropout > 0.0 {
            ops::dropout(x, self.dropout as f32)?
        } else {
            x.clone()
        };
        Ok(x.broadcast_matmul(&self.a)?
            .broadcast_matmul(&self.b)?
            .affine(self.scale, 0.0)?)
    }
}

/// The forward pass, shared by the trainer and the generation snapshot
struct Modules {
    embed: Embedding,
    ff: Linear,
    head: Linear,
    ff_lora: Option<LowRank>,
    head_lora: Option<LowRank>,
}

impl Modules {
    /// (batch, time) token ids -> (batch, time, vocab) logits
    fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.embed.forward(input)?;
        let mut h = self.ff.forward(&x)?;
        if let Some(lora) = &self.ff_lora {
            h = (h + lora.forward(&x, train)?)?;
        }
        let h = h.relu()?;
        let mut logits = self.head.forward(&h)?;
        if let Some(lora) = &self.head_lora {
            logits = (logits + lora.forward(&h, train)?)?;
        }
        Ok(logits)
    }
}

struct AdapterHandle {
    varmap: VarMap,
    config: AdapterConfig,
}

/// Single-process trainable model
pub struct LocalModel {
    device: Device,
    vocab_size: usize,
    hidden_dim: usize,
    varmap: VarMap,
    adapter: Option<AdapterHandle>,
    modules: Modules,
    optimizer: AdamW,
}

impl LocalModel {
    pub fn new(
        model: &ModelConfig,
        optimizer: &OptimizerConfig,
        adapter: Option<&AdapterConfig>,
        vocab_size: usize,
        device: Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let embed = embedding(vocab_size, model.hidden_dim, vb.pp("embed"))?;
        let ff = linear(model.hidden_dim, model.hidden_dim, vb.pp("ff"))?;
        let head = linear(model.hidden_dim, vocab_size, vb.pp("head"))?;

        let (adapter_handle, ff_lora, head_lora) = match adapter {
            Some(config) => {
                for module in &config.target_modules {
                    if !TARGET_MODULES.contains(&module.as_str()) {
                        anyhow::bail!("{}", adapter_target_error(module, TARGET_MODULES));
                    }
                }
                let adapter_map = VarMap::new();
                let avb = VarBuilder::from_varmap(&adapter_map, DType::F32, &device);
                let targets = |name: &str| config.target_modules.iter().any(|m| m == name);
                let ff_lora = targets("ff")
                    .then(|| {
                        LowRank::init(&avb.pp("ff"), model.hidden_dim, model.hidden_dim, config)
                    })
                    .transpose()?;
                let head_lora = targets("head")
                    .then(|| LowRank::init(&avb.pp("head"), model.hidden_dim, vocab_size, config))
                    .transpose()?;
                (
                    Some(AdapterHandle {
                        varmap: adapter_map,
                        config: config.clone(),
                    }),
                    ff_lora,
                    head_lora,
                )
            }
            None => (None, None, None),
        };

        // With an adapter configured only its weights train; the base stays
        // frozen by never reaching the optimizer.
        let trainable = match &adapter_handle {
            Some(handle) => handle.varmap.all_vars(),
            None => varmap.all_vars(),
        };
        let optimizer = AdamW::new(
            trainable,
            ParamsAdamW {
                lr: optimizer.lr,
                beta1: optimizer.beta1,
                beta2: optimizer.beta2,
                eps: 1e-8,
                weight_decay: optimizer.weight_decay,
            },
        )?;

        Ok(Self {
            device,
            vocab_size,
            hidden_dim: model.hidden_dim,
            varmap,
            adapter: adapter_handle,
            modules: Modules {
                embed,
                ff,
                head,
                ff_lora,
                head_lora,
            },
            optimizer,
        })
    }

    /// Build the generation engine that shadows this model's live weights
    pub fn generation_engine(
        &self,
        tokenizer: Tokenizer,
        max_seq_len: usize,
    ) -> LocalGenerationEngine {
        LocalGenerationEngine {
            device: self.device.clone(),
            tokenizer,
            hidden_dim: self.hidden_dim,
            max_seq_len,
            base: self.varmap.clone(),
            adapter: self
                .adapter
                .as_ref()
                .map(|handle| (handle.varmap.clone(), handle.config.clone())),
            snapshot: None,
        }
    }
}

impl ModelProvider for LocalModel {
    fn step(&mut self, batch: &Batch, lr: f64) -> Result<StepOutcome> {
        let rows = batch.input_ids.len();
        anyhow::ensure!(rows > 0, "empty batch");
        let cols = batch.input_ids[0].len();
        anyhow::ensure!(cols >= 2, "sequence length must be >= 2 for next-token loss");

        let flat: Vec<u32> = batch.input_ids.iter().flatten().copied().collect();
        let tokens = Tensor::from_vec(flat, (rows, cols), &self.device)?;
        let inputs = tokens.narrow(1, 0, cols - 1)?.contiguous()?;
        let targets = tokens.narrow(1, 1, cols - 1)?.contiguous()?.flatten_all()?;

        let logits = self.modules.forward(&inputs, true)?;
        let logits = logits.reshape((rows * (cols - 1), self.vocab_size))?;
        let loss = loss::cross_entropy(&logits, &targets)?;

        self.optimizer.set_learning_rate(lr);
        self.optimizer.backward_step(&loss)?;

        Ok(StepOutcome {
            loss: f64::from(loss.to_scalar::<f32>()?),
        })
    }
}

impl ModelPersistence for LocalModel {
    fn save_consolidated(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create save directory {}", dir.display()))?;
        self.varmap
            .save(dir.join(WEIGHTS_FILE))
            .with_context(|| format!("Failed to write model weights under {}", dir.display()))?;

        let metadata = serde_json::json!({
            "model_type": "local",
            "vocab_size": self.vocab_size,
            "hidden_dim": self.hidden_dim,
            "format_version": 1,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        fs::write(
            dir.join("config.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        tracing::info!(dir = %dir.display(), "Saved consolidated model");
        Ok(())
    }

    fn save_adapter(&self, dir: &Path) -> Result<()> {
        let adapter = self
            .adapter
            .as_ref()
            .context("adapter save requested but no adapter is configured")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create save directory {}", dir.display()))?;
        adapter
            .varmap
            .save(dir.join(ADAPTER_WEIGHTS_FILE))
            .with_context(|| format!("Failed to write adapter weights under {}", dir.display()))?;
        fs::write(
            dir.join("adapter_config.json"),
            serde_json::to_string_pretty(&adapter.config)?,
        )?;

        tracing::info!(dir = %dir.display(), "Saved adapter weights");
        Ok(())
    }

    fn restore_adapter(&mut self, dir: &Path) -> Result<()> {
        let adapter = self
            .adapter
            .as_mut()
            .context("adapter restore requested but no adapter is configured")?;
        let path = dir.join(ADAPTER_WEIGHTS_FILE);
        adapter
            .varmap
            .load(&path)
            .with_context(|| format!("Failed to load adapter weights from {}", path.display()))?;
        tracing::info!(path = %path.display(), "Restored adapter weights");
        Ok(())
    }
}

/// Greedy decoder over a detached snapshot of the trainer's weights
///
/// The engine shares the trainer's VarMaps but never reads them during
/// generation; refresh_weights copies the current values into a snapshot,
/// which is what keeps samples attributable to a known step.
pub struct LocalGenerationEngine {
    device: Device,
    tokenizer: Tokenizer,
    hidden_dim: usize,
    max_seq_len: usize,
    base: VarMap,
    adapter: Option<(VarMap, AdapterConfig)>,
    snapshot: Option<Modules>,
}

fn snapshot_tensor(map: &VarMap, name: &str) -> Result<Tensor> {
    let data = map.data().lock().expect("varmap lock poisoned");
    let var = data
        .get(name)
        .with_context(|| format!("weight '{}' missing from the trainer varmap", name))?;
    Ok(var.as_tensor().detach().copy()?)
}

impl GenerationEngine for LocalGenerationEngine {
    fn refresh_weights(&mut self, state: &TrainerState) -> Result<()> {
        let embed = Embedding::new(snapshot_tensor(&self.base, "embed.weight")?, self.hidden_dim);
        let ff = Linear::new(
            snapshot_tensor(&self.base, "ff.weight")?,
            Some(snapshot_tensor(&self.base, "ff.bias")?),
        );
        let head = Linear::new(
            snapshot_tensor(&self.base, "head.weight")?,
            Some(snapshot_tensor(&self.base, "head.bias")?),
        );

        let (ff_lora, head_lora) = match &self.adapter {
            Some((map, config)) => {
                let scale = config.alpha / config.rank as f64;
                let snapshot_lora = |module: &str| -> Result<Option<LowRank>> {
                    if !config.target_modules.iter().any(|m| m == module) {
                        return Ok(None);
                    }
                    Ok(Some(LowRank {
                        a: snapshot_tensor(map, &format!("{}.a", module))?,
                        b: snapshot_tensor(map, &format!("{}.b", module))?,
                        scale,
                        dropout: 0.0,
                    }))
                };
                (snapshot_lora("ff")?, snapshot_lora("head")?)
            }
            None => (None, None),
        };

        self.snapshot = Some(Modules {
            embed,
            ff,
            head,
            ff_lora,
            head_lora,
        });

        tracing::debug!(
            step = state.global_step(),
            "Refreshed generation engine weights"
        );
        Ok(())
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        let modules = self
            .snapshot
            .as_ref()
            .context("generate called before the first weight refresh")?;

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("Failed to encode prompt {:?}: {}", prompt, e))?;
        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        anyhow::ensure!(!ids.is_empty(), "prompt {:?} produced no tokens", prompt);
        let prompt_len = ids.len();

        for _ in 0..MAX_NEW_TOKENS {
            let window = &ids[ids.len().saturating_sub(self.max_seq_len)..];
            let input = Tensor::from_vec(window.to_vec(), (1, window.len()), &self.device)?;
            let logits = modules.forward(&input, false)?;
            let last = logits
                .narrow(1, window.len() - 1, 1)?
                .contiguous()?
                .flatten_all()?;
            let next = last.argmax(D::Minus1)?.to_scalar::<u32>()?;
            ids.push(next);
        }

        self.tokenizer
            .decode(&ids[prompt_len..], true)
            .map_err(|e| anyhow!("Failed to decode completion: {}", e))
    }
}
