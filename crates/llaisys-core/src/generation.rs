//! Autoregressive generation loop.
//!
//! Every step hands the whole sequence to the engine and appends the token
//! it returns. The loop stops on the end token, on the token budget, or
//! when cancelled.

use crate::engine::{EngineModel, SamplingParams};
use crate::error::{LlaisysError, Result};
use crate::model::ModelMetadata;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The engine returned the end token.
    EndToken,
    /// The token budget ran out.
    MaxTokens,
    /// The caller cancelled.
    Cancelled,
}

/// Generation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Prompt accepted, no step taken.
    Prompt,
    /// At least one token generated.
    Stepping,
    /// Finished.
    Done(StopReason),
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on generated tokens.
    pub max_new_tokens: usize,
    /// Sampling parameters passed to the engine.
    pub sampling: SamplingParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 128,
            sampling: SamplingParams::default(),
        }
    }
}

impl GenerationConfig {
    /// Settings with the given budget and default sampling.
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            ..Default::default()
        }
    }

    /// Replace the sampling parameters.
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Shared flag that stops a running generation before its next step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Prompt followed by every generated token.
    pub tokens: Vec<i64>,
    /// Length of the prompt prefix in `tokens`.
    pub prompt_len: usize,
    /// Number of generated tokens.
    pub generated: usize,
    /// Why the loop ended.
    pub stop_reason: StopReason,
}

impl GenerationOutput {
    /// Only the generated suffix.
    pub fn new_tokens(&self) -> &[i64] {
        &self.tokens[self.prompt_len..]
    }
}

/// Token sequence and progress of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationState {
    tokens: Vec<i64>,
    prompt_len: usize,
    budget: usize,
    stop_token: Option<i64>,
    phase: Phase,
}

impl GenerationState {
    /// Validate the request and set up the sequence.
    pub fn new(prompt: &[i64], max_new_tokens: usize, metadata: &ModelMetadata) -> Result<Self> {
        if max_new_tokens == 0 {
            return Err(LlaisysError::Config(
                "max_new_tokens must be at least 1".into(),
            ));
        }
        if prompt.is_empty() {
            return Err(LlaisysError::Config("prompt is empty".into()));
        }

        // The engine owns the context bound; the driver never trims the budget.
        let budget = max_new_tokens;

        let mut tokens = Vec::with_capacity(prompt.len() + budget);
        tokens.extend_from_slice(prompt);
        Ok(Self {
            tokens,
            prompt_len: prompt.len(),
            budget,
            stop_token: metadata.stop_token(),
            phase: Phase::Prompt,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sequence so far.
    pub fn tokens(&self) -> &[i64] {
        &self.tokens
    }

    /// Tokens generated so far.
    pub fn generated(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }

    /// Tokens that may still be generated.
    pub fn remaining(&self) -> usize {
        self.budget - self.generated()
    }

    /// Whether the loop has ended.
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done(_))
    }

    /// Stop without taking another step.
    pub fn cancel(&mut self) {
        if !self.is_done() {
            self.phase = Phase::Done(StopReason::Cancelled);
        }
    }

    /// Run one inference step and append its token.
    pub fn step<M>(&mut self, model: &mut M, sampling: &SamplingParams) -> Result<Phase>
    where
        M: EngineModel + ?Sized,
    {
        if self.is_done() {
            return Ok(self.phase);
        }

        let next = model.infer(&self.tokens, sampling)?;
        self.tokens.push(next);
        trace!(token = next, position = self.tokens.len() - 1, "generated token");

        self.phase = if self.stop_token == Some(next) {
            Phase::Done(StopReason::EndToken)
        } else if self.remaining() == 0 {
            Phase::Done(StopReason::MaxTokens)
        } else {
            Phase::Stepping
        };
        Ok(self.phase)
    }

    /// Final output.
    ///
    /// A state that never reached `Done` reports `Cancelled`.
    pub fn into_output(self) -> GenerationOutput {
        let stop_reason = match self.phase {
            Phase::Done(reason) => reason,
            Phase::Prompt | Phase::Stepping => StopReason::Cancelled,
        };
        GenerationOutput {
            generated: self.tokens.len() - self.prompt_len,
            prompt_len: self.prompt_len,
            tokens: self.tokens,
            stop_reason,
        }
    }
}

/// Generate from `prompt` until the end token, the budget, or cancellation.
pub fn generate<M>(
    model: &mut M,
    metadata: &ModelMetadata,
    prompt: &[i64],
    config: &GenerationConfig,
    cancel: Option<&CancellationToken>,
) -> Result<GenerationOutput>
where
    M: EngineModel + ?Sized,
{
    let mut state = GenerationState::new(prompt, config.max_new_tokens, metadata)?;
    debug!(
        prompt_len = prompt.len(),
        max_new_tokens = state.remaining(),
        temperature = config.sampling.temperature,
        top_p = config.sampling.top_p,
        top_k = config.sampling.top_k,
        "starting generation"
    );

    while !state.is_done() {
        if cancel.map_or(false, CancellationToken::is_cancelled) {
            state.cancel();
            break;
        }
        state.step(model, &config.sampling)?;
    }

    let output = state.into_output();
    debug!(
        generated = output.generated,
        stop_reason = ?output.stop_reason,
        "generation finished"
    );
    Ok(output)
}
