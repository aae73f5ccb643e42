//! docqa RAG crate - generation providers, prompts, response schemas, answer
//! composition, and the `DocqaService` operation surface.

pub mod composer;
pub mod generation;
pub mod prompt;
pub mod schema;
pub mod service;

pub use composer::AnswerComposer;
pub use generation::{
    build_generator, DynGenerationService, GenerationRequest, GenerationService, MockGenerator,
    OllamaGenerator,
};
pub use schema::{SchemaIssue, SchemaNode};
pub use service::DocqaService;
