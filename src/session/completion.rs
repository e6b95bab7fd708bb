//! Completion generation.
//!
//! The loop is synchronous and blocking: tokenize, gate on capacity, feed
//! the prompt in engine-sized chunks, then sample one token at a time.
//! Fragments stream to the caller through a [`TokenListener`] on the
//! calling thread, before the next decode step; a listener error aborts the
//! whole operation.

use thiserror::Error;
use tracing::debug;

use crate::config::SamplingOptions;
use crate::engine::TokenId;
use crate::error::{BridgeError, Result};
use crate::session::lifecycle::Session;
use crate::session::sampler;

/// Error a listener returns to abort generation.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives generated text fragments as they are produced.
///
/// The listener runs synchronously between sampling a token and feeding it
/// back into the engine. Returning an error terminates the generation early
/// and surfaces as [`BridgeError::Listener`].
pub trait TokenListener {
    fn on_token(&mut self, fragment: &str) -> std::result::Result<(), ListenerError>;
}

impl<F> TokenListener for F
where
    F: FnMut(&str) -> std::result::Result<(), ListenerError>,
{
    fn on_token(&mut self, fragment: &str) -> std::result::Result<(), ListenerError> {
        self(fragment)
    }
}

/// Run one completion against a session. `options` must already be
/// sanitized.
pub(crate) fn run(
    session: &mut Session,
    prompt: &str,
    options: &SamplingOptions,
    mut listener: Option<&mut dyn TokenListener>,
) -> Result<String> {
    session.tokens_processed = 0;

    if options.max_tokens <= 0 {
        return Ok(String::new());
    }

    let mut prompt_tokens = session.model.tokenize(prompt)?;
    if prompt_tokens.is_empty() {
        let bos = session
            .model
            .bos_token()
            .ok_or(BridgeError::MissingBosToken)?;
        prompt_tokens.push(bos);
    }

    let needed = prompt_tokens.len() as i64 + i64::from(options.max_tokens);
    if needed > i64::from(session.context_size) {
        return Err(BridgeError::ContextExhausted {
            needed,
            capacity: i64::from(session.context_size),
        });
    }

    session
        .context
        .set_thread_counts(session.thread_count, session.thread_count_batch);

    feed_tokens(session, &prompt_tokens)?;

    let mut chain = sampler::build_chain(session.context.as_ref(), options, session.context_size)?;
    for &token in &prompt_tokens {
        chain.accept(token);
    }

    let mut completion = String::with_capacity(options.max_tokens as usize * 4);
    for _ in 0..options.max_tokens {
        let next = chain.sample()?;
        if session.model.is_end_of_generation(next) {
            break;
        }

        let fragment = session.model.token_text(next)?;
        completion.push_str(&fragment);

        if let Some(cut) = stop_match(&completion, &options.stop_sequences) {
            // The matched suffix is dropped and the token that completed it
            // is neither accepted nor delivered to the listener.
            completion.truncate(cut);
            break;
        }

        chain.accept(next);

        if let Some(listener) = listener.as_deref_mut() {
            listener
                .on_token(&fragment)
                .map_err(|err| BridgeError::Listener(err.to_string()))?;
        }

        feed_tokens(session, &[next])?;
    }

    debug!(
        prompt_tokens = prompt_tokens.len(),
        chars = completion.len(),
        "completion finished"
    );
    Ok(completion)
}

/// Feed tokens to the engine in chunks no larger than its batch limit,
/// positions continuing the session's running counter.
fn feed_tokens(session: &mut Session, tokens: &[TokenId]) -> Result<()> {
    if tokens.is_empty() {
        return Ok(());
    }

    let max_batch = session.context.batch_limit().max(1) as usize;
    let mut processed = 0;
    while processed < tokens.len() {
        let chunk_len = max_batch.min(tokens.len() - processed);
        let chunk = &tokens[processed..processed + chunk_len];
        session.context.decode(chunk, session.tokens_processed)?;
        session.tokens_processed += chunk_len as i32;
        processed += chunk_len;
    }
    Ok(())
}

/// If `output` ends with any stop sequence, return the byte offset where
/// the matched suffix begins. Sequences are checked in the order given.
fn stop_match(output: &str, stop_sequences: &[String]) -> Option<usize> {
    stop_sequences
        .iter()
        .filter(|stop| !stop.is_empty())
        .find(|stop| output.ends_with(stop.as_str()))
        .map(|stop| output.len() - stop.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_match_finds_suffixes_only() {
        let stops = vec!["###".to_string(), "\n\n".to_string()];
        assert_eq!(stop_match("answer ###", &stops), Some(7));
        assert_eq!(stop_match("### answer", &stops), None);
        assert_eq!(stop_match("answer\n\n", &stops), Some(6));
        assert_eq!(stop_match("answer", &stops), None);
    }

    #[test]
    fn stop_match_ignores_empty_sequences() {
        let stops = vec![String::new()];
        assert_eq!(stop_match("anything", &stops), None);
    }

    #[test]
    fn stop_match_takes_the_first_configured_match() {
        let stops = vec!["ab".to_string(), "b".to_string()];
        assert_eq!(stop_match("xab", &stops), Some(1));
    }
}
