//! SQL generation: fixed parameterized templates with an LLM-authored
//! fallback.
//!
//! Both paths hand the executor a [`SqlQuery`] carrying `$n` placeholders
//! and bind values; entity text never lands inside the SQL string itself.

use crate::providers::registry::LlmClient;
use crate::providers::ProviderError;
use crate::store::SqlQuery;
use crate::types::{Entities, SqlQueryType};

pub mod custom;
pub mod templates;

/// Errors from the SQL generation stage.
#[derive(Debug, thiserror::Error)]
pub enum SqlGenError {
    /// A template matched the question kind but a required entity is
    /// absent. The orchestrator falls back to the custom generator.
    #[error("template rejected: missing required {0}")]
    MissingRequired(&'static str),
    /// The LLM-authored query failed the safety checks.
    #[error("custom query rejected: {0}")]
    Rejected(String),
    /// The generation model call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// The SQL generation stage: templates first, LLM fallback second.
pub struct SqlGenerator {
    llm: LlmClient,
    model_spec: String,
}

impl SqlGenerator {
    /// Create a generator; `model_spec` drives the custom fallback.
    pub fn new(llm: LlmClient, model_spec: impl Into<String>) -> Self {
        Self {
            llm,
            model_spec: model_spec.into(),
        }
    }

    /// Compose the query for a routed question.
    ///
    /// Template kinds try their template first and fall back to the custom
    /// generator when a required entity is missing; `custom` goes straight
    /// to the fallback.
    ///
    /// # Errors
    ///
    /// Returns [`SqlGenError`] when the fallback also fails.
    pub async fn create_query(
        &self,
        question: &str,
        entities: &Entities,
        kind: SqlQueryType,
    ) -> Result<SqlQuery, SqlGenError> {
        if kind != SqlQueryType::Custom {
            match templates::generate(kind, entities) {
                Ok(query) => return Ok(query),
                Err(SqlGenError::MissingRequired(param)) => {
                    tracing::info!(
                        kind = %kind,
                        missing = param,
                        "template rejected, falling back to custom generation"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        custom::generate(&self.llm, &self.model_spec, question, entities).await
    }
}
