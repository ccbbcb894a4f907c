//! Structured Generator: one generic path for every artifact kind.
//!
//! Flow: build_prompt → provider call with the artifact's schema as a forced
//!       tool → deserialize → validate → finalize.
//!
//! `AppState` holds an `Arc<dyn StructuredGenerator>`; production wires the
//! `LlmClient`, tests wire a scripted fake.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::generation::prompts::{build_prompt, PromptContext};
use crate::generation::schemas::{Artifact, ArtifactKind};
use crate::llm_client::prompts::STRUCTURED_OUTPUT_SYSTEM;
use crate::llm_client::{LlmClient, ToolSpec};

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Produces a raw JSON value constrained by `schema`. Typed decoding and
/// validation happen in [`generate`], so backends only move bytes.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate_value(
        &self,
        kind: ArtifactKind,
        schema: &Value,
        prompt: &str,
    ) -> Result<Value, AppError>;
}

#[async_trait]
impl StructuredGenerator for LlmClient {
    async fn generate_value(
        &self,
        kind: ArtifactKind,
        schema: &Value,
        prompt: &str,
    ) -> Result<Value, AppError> {
        let tool = ToolSpec {
            name: kind.tool_name(),
            description: kind.tool_description(),
            input_schema: schema,
        };
        self.call_structured(prompt, STRUCTURED_OUTPUT_SYSTEM, tool)
            .await
            .map_err(|e| AppError::Llm(format!("{kind} generation failed: {e}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Generic pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Generates and checks one artifact. A single provider attempt: any provider
/// error or schema mismatch is returned as `AppError::Llm`.
pub async fn generate<T: Artifact>(
    generator: &dyn StructuredGenerator,
    ctx: &PromptContext<'_>,
) -> Result<T, AppError> {
    let kind = T::KIND;
    let prompt = build_prompt(kind, ctx);
    let schema = T::input_schema();

    let raw = generator.generate_value(kind, &schema, &prompt).await?;

    let mut artifact: T = serde_json::from_value(raw).map_err(|e| {
        warn!("{kind} output did not match schema: {e}");
        AppError::Llm(format!("{kind} output did not match schema: {e}"))
    })?;

    if let Err(reason) = artifact.validate() {
        warn!("{kind} output failed validation: {reason}");
        return Err(AppError::Llm(format!(
            "{kind} output failed validation: {reason}"
        )));
    }

    artifact.finalize();
    info!("Generated {kind} artifact");
    Ok(artifact)
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Returns a canned value per kind and counts calls.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        responses: Mutex<HashMap<ArtifactKind, Value>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub fn with(self, kind: ArtifactKind, value: Value) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(kind, value);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StructuredGenerator for ScriptedGenerator {
        async fn generate_value(
            &self,
            kind: ArtifactKind,
            _schema: &Value,
            _prompt: &str,
        ) -> Result<Value, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .ok_or_else(|| AppError::Llm(format!("no scripted output for {kind}")))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
