// Structured generation of the four analysis artifacts.
// All provider calls go through llm_client via the StructuredGenerator trait.

pub mod cache;
pub mod generator;
pub mod prompts;
pub mod schemas;
