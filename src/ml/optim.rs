// ============================================================
// Layer 5 — Optimizer Registry and Schedule
// ============================================================
// Resolves the configured algorithm name against two explicit
// registries and wraps the result with a one-cycle learning
// rate schedule stepped once per optimization step.
//
// Two namespaces exist because the same name can carry two
// different signatures: the general numeric registry holds the
// classic algorithms, the transformer-tuned registry holds the
// decoupled-weight-decay AdamW variant. Lookup order is
// general → transformer; a keyword rejected by the general
// signature triggers exactly one fallback lookup into the
// transformer registry. A name found in neither is a fatal
// configuration error naming the string.
//
// Burn's Optimizer::step takes the learning rate every call, so
// the schedule is a step-indexed struct whose step() value is
// fed straight into optim.step.
//
// Reference: Smith & Topin (2018) Super-Convergence (one-cycle)
//            Loshchilov & Hutter (2019) Decoupled Weight Decay

use anyhow::{bail, Result};
use std::collections::HashMap;

use burn::{
    module::AutodiffModule,
    optim::{
        adaptor::OptimizerAdaptor,
        decay::WeightDecayConfig,
        momentum::MomentumConfig,
        Adam, AdamConfig, AdamW, AdamWConfig, GradientsParams, Optimizer,
        RmsProp, RmsPropConfig, Sgd, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::{OptimizerSection, SchedulerSection};

// ─── Registries ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerNamespace {
    General,
    Transformer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Sgd,
    Adam,
    RmsProp,
    AdamW,
}

/// (name, constructor tag, accepted keyword arguments)
type RegistryEntry = (&'static str, AlgorithmKind, &'static [&'static str]);

const GENERAL_REGISTRY: &[RegistryEntry] = &[
    ("Sgd",     AlgorithmKind::Sgd,     &["lr", "momentum", "weight_decay"]),
    ("Adam",    AlgorithmKind::Adam,    &["lr", "beta1", "beta2", "epsilon"]),
    ("RmsProp", AlgorithmKind::RmsProp, &["lr", "alpha", "epsilon", "momentum"]),
    // Bare signature — the decoupled-weight-decay variant lives
    // in the transformer registry
    ("AdamW",   AlgorithmKind::AdamW,   &["lr", "beta1", "beta2", "epsilon"]),
];

const TRANSFORMER_REGISTRY: &[RegistryEntry] = &[
    ("AdamW", AlgorithmKind::AdamW,
     &["lr", "beta1", "beta2", "epsilon", "weight_decay", "correct_bias"]),
];

fn lookup(registry: &[RegistryEntry], name: &str) -> Option<RegistryEntry> {
    registry.iter().copied().find(|(n, _, _)| *n == name)
}

/// Every supplied keyword must appear in the signature;
/// anything else is an argument-shape mismatch.
fn check_kwargs(kwargs: &HashMap<String, f64>, accepted: &[&str]) -> Result<()> {
    for key in kwargs.keys() {
        if !accepted.contains(&key.as_str()) {
            bail!("unexpected keyword argument '{key}'");
        }
    }
    Ok(())
}

// ─── Resolution ───────────────────────────────────────────────────────────────

/// The outcome of a successful registry lookup: which namespace
/// answered, which algorithm to construct, and its
/// hyperparameters.
#[derive(Debug, Clone)]
pub struct ResolvedOptimizer {
    pub namespace: OptimizerNamespace,
    pub kind:      AlgorithmKind,
    pub lr:        f64,
    kwargs:        HashMap<String, f64>,
}

impl ResolvedOptimizer {
    fn kwarg(&self, key: &str) -> Option<f64> {
        self.kwargs.get(key).copied()
    }
}

/// Resolve `optimizer.name` + `optimizer.kwargs` to a
/// constructible algorithm.
///
/// `kwargs` must include `lr` — the schedule's peak rate is read
/// from it before construction.
pub fn resolve(section: &OptimizerSection) -> Result<ResolvedOptimizer> {
    let name = section.name.as_str();
    let kwargs = &section.kwargs;

    let Some(&lr) = kwargs.get("lr") else {
        bail!("optimizer.kwargs must include 'lr' (required by the schedule)");
    };

    let resolved = |namespace, kind: AlgorithmKind| ResolvedOptimizer {
        namespace,
        kind,
        lr,
        kwargs: kwargs.clone(),
    };

    if let Some((_, kind, accepted)) = lookup(GENERAL_REGISTRY, name) {
        match check_kwargs(kwargs, accepted) {
            Ok(()) => return Ok(resolved(OptimizerNamespace::General, kind)),
            // Exactly one alternate attempt: the same name may
            // carry a wider signature in the transformer registry
            Err(mismatch) => {
                if let Some((_, kind, accepted)) = lookup(TRANSFORMER_REGISTRY, name) {
                    check_kwargs(kwargs, accepted)?;
                    return Ok(resolved(OptimizerNamespace::Transformer, kind));
                }
                return Err(mismatch.context(format!(
                    "cannot construct optimizer '{name}' from the given kwargs"
                )));
            }
        }
    }

    if let Some((_, kind, accepted)) = lookup(TRANSFORMER_REGISTRY, name) {
        check_kwargs(kwargs, accepted)?;
        return Ok(resolved(OptimizerNamespace::Transformer, kind));
    }

    bail!("Unexpected learning algorithm \"{name}\"");
}

// ─── Construction ─────────────────────────────────────────────────────────────

/// One enum over the burn optimizer adaptors so the trainer can
/// hold whichever algorithm the config named.
pub enum DialogueOptimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    Sgd(OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>),
    Adam(OptimizerAdaptor<Adam, M, B>),
    RmsProp(OptimizerAdaptor<RmsProp, M, B>),
    AdamW(OptimizerAdaptor<AdamW, M, B>),
}

impl<M, B> DialogueOptimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    pub fn step(&mut self, lr: f64, model: M, grads: GradientsParams) -> M {
        match self {
            Self::Sgd(o)     => o.step(lr, model, grads),
            Self::Adam(o)    => o.step(lr, model, grads),
            Self::RmsProp(o) => o.step(lr, model, grads),
            Self::AdamW(o)   => o.step(lr, model, grads),
        }
    }
}

impl ResolvedOptimizer {
    /// Construct the burn optimizer this resolution names.
    pub fn init<B, M>(&self) -> DialogueOptimizer<M, B>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        match self.kind {
            AlgorithmKind::Sgd => {
                let mut cfg = SgdConfig::new();
                if let Some(momentum) = self.kwarg("momentum") {
                    cfg = cfg.with_momentum(Some(
                        MomentumConfig::new().with_momentum(momentum),
                    ));
                }
                if let Some(wd) = self.kwarg("weight_decay") {
                    cfg = cfg.with_weight_decay(Some(WeightDecayConfig::new(wd as f32)));
                }
                DialogueOptimizer::Sgd(cfg.init())
            }
            AlgorithmKind::Adam => {
                let mut cfg = AdamConfig::new();
                if let Some(b1) = self.kwarg("beta1") {
                    cfg = cfg.with_beta_1(b1 as f32);
                }
                if let Some(b2) = self.kwarg("beta2") {
                    cfg = cfg.with_beta_2(b2 as f32);
                }
                if let Some(eps) = self.kwarg("epsilon") {
                    cfg = cfg.with_epsilon(eps as f32);
                }
                DialogueOptimizer::Adam(cfg.init())
            }
            AlgorithmKind::RmsProp => {
                let mut cfg = RmsPropConfig::new();
                if let Some(alpha) = self.kwarg("alpha") {
                    cfg = cfg.with_alpha(alpha as f32);
                }
                if let Some(eps) = self.kwarg("epsilon") {
                    cfg = cfg.with_epsilon(eps as f32);
                }
                if let Some(momentum) = self.kwarg("momentum") {
                    cfg = cfg.with_momentum(momentum as f32);
                }
                DialogueOptimizer::RmsProp(cfg.init())
            }
            AlgorithmKind::AdamW => {
                let mut cfg = AdamWConfig::new();
                if let Some(b1) = self.kwarg("beta1") {
                    cfg = cfg.with_beta_1(b1 as f32);
                }
                if let Some(b2) = self.kwarg("beta2") {
                    cfg = cfg.with_beta_2(b2 as f32);
                }
                if let Some(eps) = self.kwarg("epsilon") {
                    cfg = cfg.with_epsilon(eps as f32);
                }
                if let Some(wd) = self.kwarg("weight_decay") {
                    cfg = cfg.with_weight_decay(wd as f32);
                }
                if self.kwarg("correct_bias").is_some() {
                    // burn's AdamW always applies bias correction
                    tracing::debug!("correct_bias accepted for signature compatibility");
                }
                DialogueOptimizer::AdamW(cfg.init())
            }
        }
    }
}

// ─── One-cycle schedule ───────────────────────────────────────────────────────

/// Cosine one-cycle learning-rate schedule, stepped once per
/// optimization step (not per epoch).
///
/// Ramps from `max_lr / div_factor` up to `max_lr` over the
/// first `pct_start` share of the run, then anneals down to
/// `max_lr / div_factor / final_div_factor`.
#[derive(Debug, Clone)]
pub struct OneCycleSchedule {
    max_lr:       f64,
    initial_lr:   f64,
    final_lr:     f64,
    warmup_steps: usize,
    total_steps:  usize,
    current:      usize,
}

impl OneCycleSchedule {
    pub fn new(max_lr: f64, total_steps: usize, section: &SchedulerSection) -> Self {
        let total_steps = total_steps.max(1);
        let initial_lr = max_lr / section.div_factor;
        Self {
            max_lr,
            initial_lr,
            final_lr: initial_lr / section.final_div_factor,
            warmup_steps: ((total_steps as f64) * section.pct_start).round() as usize,
            total_steps,
            current: 0,
        }
    }

    /// The rate for the current optimization step; advances the
    /// schedule.
    pub fn step(&mut self) -> f64 {
        let lr = self.lr_at(self.current);
        self.current += 1;
        lr
    }

    fn lr_at(&self, step: usize) -> f64 {
        let step = step.min(self.total_steps);
        if step < self.warmup_steps {
            let pct = step as f64 / self.warmup_steps.max(1) as f64;
            cosine_interp(self.initial_lr, self.max_lr, pct)
        } else {
            let span = (self.total_steps - self.warmup_steps).max(1);
            let pct = (step - self.warmup_steps) as f64 / span as f64;
            cosine_interp(self.max_lr, self.final_lr, pct)
        }
    }
}

/// Cosine interpolation from `start` (pct = 0) to `end` (pct = 1).
fn cosine_interp(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * (1.0 + (std::f64::consts::PI * pct).cos())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn section(name: &str, pairs: &[(&str, f64)]) -> OptimizerSection {
        OptimizerSection {
            name:   name.to_string(),
            kwargs: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_general_name_with_valid_kwargs_resolves_with_configured_lr() {
        let resolved = resolve(&section("Adam", &[("lr", 1e-4), ("beta1", 0.9)])).unwrap();
        assert_eq!(resolved.namespace, OptimizerNamespace::General);
        assert_eq!(resolved.kind, AlgorithmKind::Adam);
        assert_eq!(resolved.lr, 1e-4);
    }

    #[test]
    fn test_unknown_name_fails_naming_the_algorithm() {
        let err = resolve(&section("Lion", &[("lr", 1e-4)])).unwrap_err();
        assert!(err.to_string().contains("Lion"));
    }

    #[test]
    fn test_missing_lr_is_a_configuration_error() {
        let err = resolve(&section("Adam", &[("beta1", 0.9)])).unwrap_err();
        assert!(err.to_string().contains("lr"));
    }

    #[test]
    fn test_kwarg_mismatch_falls_back_to_transformer_namespace() {
        // weight_decay is rejected by the bare general AdamW
        // signature, accepted by the transformer variant
        let resolved =
            resolve(&section("AdamW", &[("lr", 6.25e-5), ("weight_decay", 0.01)])).unwrap();
        assert_eq!(resolved.namespace, OptimizerNamespace::Transformer);
        assert_eq!(resolved.kind, AlgorithmKind::AdamW);
    }

    #[test]
    fn test_kwarg_mismatch_without_transformer_counterpart_fails() {
        let err = resolve(&section("Adam", &[("lr", 1e-4), ("correct_bias", 1.0)])).unwrap_err();
        assert!(format!("{err:#}").contains("Adam"));
    }

    #[test]
    fn test_bare_adamw_stays_in_general_namespace() {
        let resolved = resolve(&section("AdamW", &[("lr", 6.25e-5)])).unwrap();
        assert_eq!(resolved.namespace, OptimizerNamespace::General);
    }

    fn schedule(max_lr: f64, total: usize) -> OneCycleSchedule {
        OneCycleSchedule::new(max_lr, total, &SchedulerSection {
            pct_start:        0.25,
            div_factor:       25.0,
            final_div_factor: 1e4,
        })
    }

    #[test]
    fn test_one_cycle_starts_low_peaks_then_anneals() {
        let mut sched = schedule(1.0, 100);

        let first = sched.step();
        assert!((first - 1.0 / 25.0).abs() < 1e-9);

        // Warm up to the peak at step 25
        let mut peak = first;
        for _ in 0..25 {
            peak = sched.step();
        }
        assert!((peak - 1.0).abs() < 1e-6);

        // Anneal to the floor at the end
        let mut last = peak;
        for _ in 0..75 {
            last = sched.step();
        }
        assert!(last < first);
        assert!((last - (1.0 / 25.0) / 1e4).abs() < 1e-6);
    }

    #[test]
    fn test_one_cycle_is_stable_past_the_end() {
        let mut sched = schedule(1.0, 10);
        for _ in 0..20 {
            sched.step();
        }
        let after_end = sched.step();
        assert!((after_end - (1.0 / 25.0) / 1e4).abs() < 1e-9);
    }
}
