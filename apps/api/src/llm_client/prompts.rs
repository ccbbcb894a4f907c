// Shared prompt constants used across every generation task.
// Each artifact's own template lives in generation/prompts.rs.

/// System prompt that pins the model to the declared output tool.
pub const STRUCTURED_OUTPUT_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST answer by calling the provided tool exactly once. \
    The tool input MUST match the tool's input schema exactly. \
    Do NOT add fields that are not in the schema. \
    Do NOT include explanations or apologies.";

/// Output language instruction appended to all generation prompts.
pub const LANGUAGE_INSTRUCTION: &str =
    "IMPORTANT: Provide ALL output text in **Bahasa Indonesia** (Indonesian language).";
