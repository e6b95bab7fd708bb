//! Token budget estimation for hosts.
//!
//! Hosts that pick a max-token count before tokenizing need a cheap
//! estimate of how much of the context a prompt will consume. The figures
//! here are heuristics (roughly four characters per token); the completion
//! path still enforces the real capacity check against actual token counts.

const DEFAULT_MAX_TOKEN_FRACTION: f64 = 0.5;
const MIN_DEFAULT_MAX_TOKENS: i32 = 16;
const AVERAGE_CHARS_PER_TOKEN: f64 = 4.0;

/// How a prompt divides a context between input and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Estimated tokens the prompt will occupy.
    pub prompt_tokens: i32,

    /// Context slots left after the prompt.
    pub remaining_tokens: i32,

    /// Effective max-token count: configured value clamped to the remainder.
    pub max_tokens: i32,
}

/// Default generation allowance for a context: half of it, at least
/// [`MIN_DEFAULT_MAX_TOKENS`], never more than the whole context.
pub fn derive_default_max_tokens(context_size: i32) -> i32 {
    let context = context_size.max(0);
    if context == 0 {
        return 0;
    }
    let scaled = (f64::from(context) * DEFAULT_MAX_TOKEN_FRACTION).round() as i32;
    MIN_DEFAULT_MAX_TOKENS.max(scaled).min(context)
}

/// Estimate the token count of a prompt without tokenizing it.
pub fn estimate_prompt_tokens(prompt: &str) -> i32 {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let word_estimate = trimmed.split_whitespace().count() as i32;
    let char_estimate =
        ((trimmed.chars().count() as f64 / AVERAGE_CHARS_PER_TOKEN).round() as i32).max(1);
    word_estimate.max(char_estimate)
}

/// Split a context between an estimated prompt and a configured max-token
/// count.
pub fn compute_token_budget(prompt: &str, context_size: i32, configured_max_tokens: i32) -> TokenBudget {
    let context = context_size.max(0);
    let prompt_tokens = estimate_prompt_tokens(prompt);
    let remaining_tokens = (context - prompt_tokens).max(0);
    let max_tokens = remaining_tokens.min(configured_max_tokens.max(0));
    TokenBudget {
        prompt_tokens,
        remaining_tokens,
        max_tokens,
    }
}
