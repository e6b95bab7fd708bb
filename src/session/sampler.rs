//! Sampler chain assembly.
//!
//! The chain is assembled per completion call in a fixed order: penalties,
//! top-k, top-p, temperature, then the terminal distribution sampler. Each
//! stage is appended only when the caller asked for it; the penalties stage
//! additionally requires at least one penalty to be meaningfully nonzero.

use crate::config::SamplingOptions;
use crate::engine::{Context, SamplerChain, DEFAULT_SEED};
use crate::error::Result;

/// Penalty values this close to their neutral point count as disabled even
/// when the caller set them explicitly.
pub(crate) const PENALTY_EPSILON: f32 = 1e-5;

/// Penalty window when the caller leaves `repeat_last_n` unset, capped by
/// the context size.
pub(crate) const DEFAULT_REPEAT_WINDOW: i32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PenaltyStage {
    pub(crate) last_n: i32,
    pub(crate) repeat: f32,
    pub(crate) frequency: f32,
    pub(crate) presence: f32,
}

/// Decide whether the penalties stage is needed and with which values.
/// Members below the activation epsilon are neutralized rather than passed
/// through.
pub(crate) fn plan_penalties(options: &SamplingOptions, context_size: i32) -> Option<PenaltyStage> {
    let repeat = options.repeat_penalty.unwrap_or(1.0);
    let frequency = options.frequency_penalty.unwrap_or(0.0);
    let presence = options.presence_penalty.unwrap_or(0.0);

    let use_repeat = options.repeat_penalty.is_some() && repeat > 1.0 + PENALTY_EPSILON;
    let use_frequency = options.frequency_penalty.is_some() && frequency.abs() > PENALTY_EPSILON;
    let use_presence = options.presence_penalty.is_some() && presence.abs() > PENALTY_EPSILON;

    if !(use_repeat || use_frequency || use_presence) {
        return None;
    }

    Some(PenaltyStage {
        last_n: options
            .repeat_last_n
            .unwrap_or_else(|| context_size.min(DEFAULT_REPEAT_WINDOW)),
        repeat: if use_repeat { repeat } else { 1.0 },
        frequency: if use_frequency { frequency } else { 0.0 },
        presence: if use_presence { presence } else { 0.0 },
    })
}

/// Build the full chain for one completion call.
pub(crate) fn build_chain(
    context: &dyn Context,
    options: &SamplingOptions,
    context_size: i32,
) -> Result<Box<dyn SamplerChain>> {
    let mut chain = context.new_sampler_chain()?;

    if let Some(stage) = plan_penalties(options, context_size) {
        chain.add_penalties(stage.last_n, stage.repeat, stage.frequency, stage.presence)?;
    }
    if let Some(k) = options.top_k {
        chain.add_top_k(k)?;
    }
    if let Some(p) = options.top_p {
        chain.add_top_p(p, 1)?;
    }
    if let Some(temperature) = options.temperature {
        chain.add_temperature(temperature)?;
    }
    chain.add_distribution(options.seed.unwrap_or(DEFAULT_SEED))?;

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with_repeat(repeat: f32) -> SamplingOptions {
        let mut options = SamplingOptions::new(16);
        options.repeat_penalty = Some(repeat);
        options
    }

    #[test]
    fn repeat_penalty_below_epsilon_stays_disabled() {
        assert_eq!(plan_penalties(&options_with_repeat(1.000_001), 2048), None);
        assert_eq!(plan_penalties(&options_with_repeat(1.0), 2048), None);
    }

    #[test]
    fn repeat_penalty_above_epsilon_enables_the_stage() {
        let stage = plan_penalties(&options_with_repeat(1.3), 2048).unwrap();
        assert_eq!(
            stage,
            PenaltyStage {
                last_n: 64,
                repeat: 1.3,
                frequency: 0.0,
                presence: 0.0,
            }
        );
    }

    #[test]
    fn default_window_is_capped_by_context_size() {
        let stage = plan_penalties(&options_with_repeat(1.3), 32).unwrap();
        assert_eq!(stage.last_n, 32);
    }

    #[test]
    fn explicit_window_wins() {
        let mut options = options_with_repeat(1.3);
        options.repeat_last_n = Some(128);
        let stage = plan_penalties(&options, 32).unwrap();
        assert_eq!(stage.last_n, 128);
    }

    #[test]
    fn tiny_frequency_penalty_is_ignored_but_real_one_counts() {
        let mut options = SamplingOptions::new(16);
        options.frequency_penalty = Some(1e-6);
        assert_eq!(plan_penalties(&options, 2048), None);

        options.frequency_penalty = Some(-0.5);
        let stage = plan_penalties(&options, 2048).unwrap();
        assert_eq!(stage.frequency, -0.5);
        assert_eq!(stage.repeat, 1.0);
    }

    #[test]
    fn presence_penalty_alone_activates_with_neutral_partners() {
        let mut options = SamplingOptions::new(16);
        options.presence_penalty = Some(0.2);
        options.repeat_penalty = Some(1.000_001);

        let stage = plan_penalties(&options, 2048).unwrap();
        assert_eq!(stage.presence, 0.2);
        assert_eq!(stage.repeat, 1.0);
        assert_eq!(stage.frequency, 0.0);
    }
}
