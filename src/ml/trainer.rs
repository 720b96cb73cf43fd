// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Full train + validation loop using Burn's DataLoader.
//
// Key Burn insight:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns model on MyInnerBackend (Wgpu)
//   - Validation batcher must also use MyInnerBackend
//
// The optimizer comes out of the two-namespace registry and is
// stepped at the one-cycle schedule's current rate — once per
// optimization step, not once per epoch. Validation runs after
// every epoch as an explicit phase: accuracy reset, table
// accumulator opened, one eval step per batch, table flushed
// under textgen_val_<epoch>_step<step>.
//
// Reference: Burn Book §5, Smith & Topin (2018) one-cycle

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
};
use tokenizers::Tokenizer;

use crate::application::train_use_case::RunConfig;
use crate::data::{batcher::DialogueBatcher, dataset::DialogueDataset};
use crate::domain::tokens::SpecialTokens;
use crate::domain::traits::DialogueTokenizer;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::ScalarLogger;
use crate::infra::table_logger::EvalTableLogger;
use crate::ml::generation::GenerationController;
use crate::ml::model::{DoubleHeadsConfig, DoubleHeadsModel};
use crate::ml::objective::ObjectiveWeights;
use crate::ml::optim::{resolve, OneCycleSchedule};
use crate::ml::wrapper::ModelWrapper;

type MyBackend      = burn::backend::Autodiff<burn::backend::Wgpu>;
type MyInnerBackend = burn::backend::Wgpu;

/// Model architecture from the run config plus the tokenizer's
/// vocabulary size — the embedding table is sized to the
/// vocabulary once, at construction.
fn model_config(cfg: &RunConfig, tokenizer: &Tokenizer) -> Result<DoubleHeadsConfig> {
    let special = SpecialTokens::resolve(tokenizer)?;
    Ok(DoubleHeadsConfig::new(
        DialogueTokenizer::vocab_size(tokenizer),
        cfg.data.max_seq_len,
        cfg.model.d_model,
        cfg.model.num_heads,
        cfg.model.num_layers,
        cfg.model.d_ff,
        cfg.model.dropout,
        special.pad as usize,
    ))
}

fn build_wrapper(cfg: &RunConfig, tokenizer: Tokenizer) -> Result<ModelWrapper<Tokenizer>> {
    Ok(ModelWrapper::new(
        tokenizer,
        ObjectiveWeights::new(cfg.train.lm_weight, cfg.train.mc_weight),
        GenerationController::new(cfg.inference.clone()),
        EvalTableLogger::with_dir(&cfg.data.metrics_dir),
        ScalarLogger::new(&cfg.data.metrics_dir)?,
    ))
}

pub fn run_training(
    cfg:           &RunConfig,
    tokenizer:     Tokenizer,
    train_dataset: DialogueDataset,
    val_dataset:   DialogueDataset,
    ckpt_manager:  CheckpointManager,
) -> Result<()> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop(cfg, tokenizer, train_dataset, val_dataset, ckpt_manager, device)
}

fn train_loop(
    cfg:           &RunConfig,
    tokenizer:     Tokenizer,
    train_dataset: DialogueDataset,
    val_dataset:   DialogueDataset,
    ckpt_manager:  CheckpointManager,
    device:        burn::backend::wgpu::WgpuDevice,
) -> Result<()> {

    // ── Build model ───────────────────────────────────────────────────────────
    let model_cfg = model_config(cfg, &tokenizer)?;
    let mut model: DoubleHeadsModel<MyBackend> = model_cfg.init(&device);
    tracing::info!(
        "Model ready: {} layers, d_model={}, vocab={}",
        cfg.model.num_layers, cfg.model.d_model, model_cfg.vocab_size,
    );

    // ── Optimizer + one-cycle schedule ────────────────────────────────────────
    let resolved = resolve(&cfg.optimizer)?;
    tracing::info!(
        "Optimizer: {} → {:?} ({:?} namespace), peak lr={}",
        cfg.optimizer.name, resolved.kind, resolved.namespace, resolved.lr,
    );
    let mut optim = resolved.init::<MyBackend, DoubleHeadsModel<MyBackend>>();

    let steps_per_epoch =
        train_dataset.sample_count().div_ceil(cfg.train.batch_size).max(1);
    let total_steps = steps_per_epoch * cfg.train.epochs;
    let mut schedule = OneCycleSchedule::new(resolved.lr, total_steps, &cfg.scheduler);

    // ── Wrapper (objectives, generation, sinks) ───────────────────────────────
    let mut wrapper = build_wrapper(cfg, tokenizer)?;

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_batcher = DialogueBatcher::<MyBackend>::new(device.clone());
    let train_loader  = DataLoaderBuilder::new(train_batcher)
        .batch_size(cfg.train.batch_size)
        .shuffle(42)
        .num_workers(1)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend — no autodiff overhead) ──────────
    let val_batcher = DialogueBatcher::<MyInnerBackend>::new(device.clone());
    let val_loader  = DataLoaderBuilder::new(val_batcher)
        .batch_size(cfg.train.batch_size)
        .num_workers(1)
        .build(val_dataset);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut global_step = 0usize;

    for epoch in 1..=cfg.train.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        wrapper.reset_accuracy();
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let loss = wrapper.training_step(&model, &batch, global_step)?;
            train_loss_sum += loss.clone().into_scalar().elem::<f64>();
            train_batches  += 1;

            // Backward pass + optimizer update at the scheduled rate
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(schedule.step(), model, grads);
            global_step += 1;
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        // model.valid() → DoubleHeadsModel<MyInnerBackend>
        // dropout disabled for deterministic evaluation
        let model_valid = model.valid();

        wrapper.reset_accuracy();
        wrapper.begin_eval_phase();

        let mut val_loss_sum = 0.0f64;
        let mut val_batches  = 0usize;

        for batch in val_loader.iter() {
            val_loss_sum += wrapper.eval_step(&model_valid, &batch, global_step)?;
            val_batches  += 1;
        }

        wrapper.end_eval_phase(&format!("textgen_val_{epoch}_step{global_step}"))?;

        let avg_val_loss = if val_batches > 0 { val_loss_sum / val_batches as f64 } else { f64::NAN };

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_mc_acc={:.1}%",
            epoch, cfg.train.epochs, avg_train_loss, avg_val_loss,
            wrapper.mc_accuracy() * 100.0,
        );

        ckpt_manager.save_model(&model, epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
    }

    tracing::info!("Training complete!");
    Ok(())
}

/// The final test pass: latest checkpoint, one evaluation phase,
/// table flushed as textgen_test.
pub fn run_test(
    cfg:          &RunConfig,
    tokenizer:    Tokenizer,
    test_dataset: DialogueDataset,
    ckpt_manager: &CheckpointManager,
) -> Result<()> {
    let device = burn::backend::wgpu::WgpuDevice::default();

    let model_cfg = model_config(cfg, &tokenizer)?;
    let model: DoubleHeadsModel<MyInnerBackend> = model_cfg.init(&device);
    let model = ckpt_manager.load_model(model, &device)?;

    let mut wrapper = build_wrapper(cfg, tokenizer)?;

    let test_batcher = DialogueBatcher::<MyInnerBackend>::new(device);
    let test_loader  = DataLoaderBuilder::new(test_batcher)
        .batch_size(cfg.train.batch_size)
        .num_workers(1)
        .build(test_dataset);

    wrapper.reset_accuracy();
    wrapper.begin_eval_phase();

    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;

    for batch in test_loader.iter() {
        loss_sum += wrapper.eval_step(&model, &batch, batches)?;
        batches  += 1;
    }

    wrapper.end_eval_phase("textgen_test")?;

    let avg_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
    println!(
        "Test | loss={:.4} | mc_acc={:.1}%",
        avg_loss,
        wrapper.mc_accuracy() * 100.0,
    );

    Ok(())
}
