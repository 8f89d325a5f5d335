//! Per-request orchestration: route, dispatch, answer, emit.
//!
//! One [`Agent`] instance serves every request task; all shared state
//! (vocabulary cache, pool, provider clients) lives behind `Arc`s built at
//! startup. Failures never escape: every error is mapped to a friendly
//! Catalan message at this boundary, with `route_used = "error"` and the
//! raw cause confined to the logs.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::answer::{hybrid_prompt, rag_prompt, sanitize_response, sql_summary_prompt};
use crate::config::XiquetConfig;
use crate::providers::registry::LlmClient;
use crate::providers::ProviderError;
use crate::rag::{build_context, build_context_with_meta, RagError, Retriever};
use crate::router::{Router, RouterError};
use crate::sqlgen::{SqlGenError, SqlGenerator};
use crate::store::vocab::VocabCache;
use crate::store::{Database, QueryOutput, StoreError};
use crate::types::{
    IdentifiedEntities, QuestionRequest, QuestionResponse, RoutePreview, RouteTool,
    RouterDecision, TableData,
};

pub mod table;

/// Canonical message when the SQL path matches nothing.
pub const NO_RESULTS_MESSAGE: &str = "No he trobat cap resultat a la base de dades per a aquesta pregunta. Prova a reformular-la o a preguntar per una altra colla, castell o diada.";

/// Message when retrieval returns nothing at all.
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No he trobat informació rellevant per respondre la teva pregunta.";

/// Message when no retrieved document clears the similarity floor.
pub const NOT_RELEVANT_MESSAGE: &str = "No he trobat informació prou rellevant per respondre la teva pregunta. Prova a reformular la pregunta.";

/// Message when data arrived but the summary call failed.
const DATA_WITHOUT_SUMMARY_MESSAGE: &str =
    "He pogut obtenir dades, però no he pogut generar una explicació. Torna-ho a provar.";

/// Attribution suffix on the SQL path.
const SQL_SOURCE_SUFFIX: &str = "*Font: Base de dades de la CCCC*";
/// Attribution suffix on the RAG path.
const RAG_SOURCE_SUFFIX: &str = "*Font: Cerca semàntica en documents castellers*";
/// Attribution suffix on the hybrid path.
const HYBRID_SOURCE_SUFFIX: &str = "*Fonts: base de dades + documents*";

/// Internal error union caught at the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rag(#[from] RagError),
    #[error(transparent)]
    SqlGen(#[from] SqlGenError),
}

impl From<RouterError> for AgentError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::Provider(p) => Self::Provider(p),
        }
    }
}

/// Friendly Catalan message for an internal failure. Never includes vendor
/// or stack detail.
fn friendly_message(error: &AgentError) -> &'static str {
    match error {
        AgentError::Provider(ProviderError::RateLimitExceeded { .. }) => {
            "No puc respondre la pregunta perquè he arribat al límit de peticions. Si us plau, torna-ho a intentar en uns moments."
        }
        AgentError::Provider(ProviderError::Auth(_)) => {
            "No puc respondre la pregunta perquè hi ha un problema amb la configuració del servei."
        }
        AgentError::Provider(ProviderError::Request(_)) => {
            "No puc respondre la pregunta perquè hi ha un problema de connexió. Si us plau, torna-ho a intentar."
        }
        AgentError::Provider(_) => {
            "No puc respondre la pregunta perquè el servei d'intel·ligència artificial no està disponible temporalment. Si us plau, torna-ho a intentar."
        }
        AgentError::Store(_) | AgentError::Rag(RagError::Store(_)) => {
            "No puc respondre la pregunta perquè hi ha un problema accedint a la base de dades."
        }
        AgentError::Rag(_) | AgentError::SqlGen(_) => {
            "No puc respondre la pregunta en aquest moment. Si us plau, torna-ho a intentar més tard."
        }
    }
}

/// The question-answering pipeline, one call per request.
pub struct Agent {
    router: Router,
    sqlgen: SqlGenerator,
    db: Database,
    retriever: Retriever,
    llm: LlmClient,
    vocab: Arc<VocabCache>,
    config: XiquetConfig,
}

impl Agent {
    /// Assemble the pipeline from its shared components.
    pub fn new(
        router: Router,
        sqlgen: SqlGenerator,
        db: Database,
        retriever: Retriever,
        llm: LlmClient,
        vocab: Arc<VocabCache>,
        config: XiquetConfig,
    ) -> Self {
        Self {
            router,
            sqlgen,
            db,
            retriever,
            llm,
            vocab,
            config,
        }
    }

    /// Prewarm the vocabulary caches from the store. Call once at startup
    /// so the first question does not pay the load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the loads fail.
    pub async fn prewarm(&self) -> Result<(), StoreError> {
        self.vocab.reload(&self.db).await
    }

    /// The routing-only entry point: the same pipeline stopped after the
    /// router, used by the UI to preview what the system understood.
    pub async fn route(&self, request: &QuestionRequest) -> RoutePreview {
        match self.router.decide(&request.content).await {
            Ok(decision) => RoutePreview {
                route_used: decision.tool.as_str().to_owned(),
                identified_entities: IdentifiedEntities::from_entities(
                    &decision.entities,
                    Some(decision.sql_query_type),
                ),
            },
            Err(e) => {
                tracing::error!(error = %e, "routing failed");
                RoutePreview {
                    route_used: "error".to_owned(),
                    identified_entities: IdentifiedEntities::default(),
                }
            }
        }
    }

    /// Answer one question. Always returns a well-formed response; internal
    /// failures surface as a friendly message with `route_used = "error"`.
    pub async fn process_question(&self, request: &QuestionRequest) -> QuestionResponse {
        let started = Instant::now();
        let question = request.content.as_str();
        tracing::info!(question = %question.chars().take(120).collect::<String>(), "processing question");

        let decision = match self.router.decide(question).await {
            Ok(decision) => decision,
            Err(e) => {
                let agent_error = AgentError::from(e);
                tracing::error!(error = %agent_error, "routing failed");
                return self.emit(
                    request,
                    friendly_message(&agent_error).to_owned(),
                    "error",
                    None,
                    None,
                    started,
                );
            }
        };
        tracing::info!(
            route = %decision.tool,
            sql_query_type = %decision.sql_query_type,
            "route decided"
        );

        let identified = IdentifiedEntities::from_entities(
            &decision.entities,
            matches!(decision.tool, RouteTool::Sql | RouteTool::Hybrid)
                .then_some(decision.sql_query_type),
        );

        let (result, table_data) = match decision.tool {
            RouteTool::Direct => (Ok(decision.direct_response.clone()), None),
            RouteTool::Rag => (self.handle_rag(question).await, None),
            RouteTool::Sql => match self.handle_sql(question, &decision).await {
                Ok((text, table)) => (Ok(text), table),
                Err(e) => (Err(e), None),
            },
            RouteTool::Hybrid => (self.handle_hybrid(question, &decision).await, None),
        };

        match result {
            Ok(text) => self.emit(
                request,
                text,
                decision.tool.as_str(),
                table_data,
                Some(identified),
                started,
            ),
            Err(e) => {
                tracing::error!(error = %e, route = %decision.tool, "handler failed");
                self.emit(
                    request,
                    friendly_message(&e).to_owned(),
                    "error",
                    None,
                    Some(identified),
                    started,
                )
            }
        }
    }

    fn emit(
        &self,
        request: &QuestionRequest,
        response: String,
        route_used: &str,
        table_data: Option<TableData>,
        identified_entities: Option<IdentifiedEntities>,
        started: Instant,
    ) -> QuestionResponse {
        QuestionResponse {
            id: Uuid::new_v4().to_string(),
            content: request.content.clone(),
            response,
            route_used: route_used.to_owned(),
            response_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            session_id: request.session_id.clone(),
            table_data,
            identified_entities,
            timestamp: Utc::now(),
        }
    }

    async fn handle_rag(&self, question: &str) -> Result<String, AgentError> {
        let docs = match self.retriever.retrieve(question).await {
            Ok(docs) => docs,
            Err(RagError::NoDocuments) => return Ok(NO_DOCUMENTS_MESSAGE.to_owned()),
            Err(RagError::BelowThreshold) => return Ok(NOT_RELEVANT_MESSAGE.to_owned()),
            Err(e) => return Err(e.into()),
        };

        let context = build_context(&docs);
        let triplet = rag_prompt(question, &context);
        let answer = self
            .llm
            .generate(
                &self.config.models.answer_model,
                &triplet.system,
                triplet.developer.as_deref(),
                &triplet.user,
            )
            .await?;
        let answer = sanitize_response(&answer);
        Ok(format!("{answer}\n\n{RAG_SOURCE_SUFFIX}"))
    }

    async fn run_sql(&self, question: &str, decision: &RouterDecision) -> Result<QueryOutput, AgentError> {
        let query = self
            .sqlgen
            .create_query(question, &decision.entities, decision.sql_query_type)
            .await?;
        Ok(self.db.execute(&query).await?)
    }

    async fn handle_sql(
        &self,
        question: &str,
        decision: &RouterDecision,
    ) -> Result<(String, Option<TableData>), AgentError> {
        let output = match self.run_sql(question, decision).await {
            Ok(output) => output,
            Err(AgentError::Store(StoreError::NoResults)) => {
                return Ok((NO_RESULTS_MESSAGE.to_owned(), None));
            }
            Err(e) => return Err(e),
        };

        let table_str = output.to_delimited(self.config.limits.result_limit_llm);
        let table_data = table::project(
            decision.sql_query_type,
            &output,
            self.config.limits.result_limit_ui,
        );

        let triplet = sql_summary_prompt(decision.sql_query_type, question, &table_str);
        let answer = match self
            .llm
            .generate(
                &self.config.models.answer_model,
                &triplet.system,
                triplet.developer.as_deref(),
                &triplet.user,
            )
            .await
        {
            Ok(answer) => sanitize_response(&answer),
            Err(e) => {
                // Data is in hand; a summary failure should not hide it.
                tracing::warn!(error = %e, "summary call failed, returning data without prose");
                return Ok((DATA_WITHOUT_SUMMARY_MESSAGE.to_owned(), table_data));
            }
        };

        Ok((format!("{answer}\n\n{SQL_SOURCE_SUFFIX}"), table_data))
    }

    async fn handle_hybrid(
        &self,
        question: &str,
        decision: &RouterDecision,
    ) -> Result<String, AgentError> {
        let sql_context = match self.run_sql(question, decision).await {
            Ok(output) => Some(output.to_delimited(self.config.limits.result_limit_llm)),
            Err(e) => {
                tracing::warn!(error = %e, "hybrid SQL side failed, continuing with retrieval");
                None
            }
        };

        let rag_context = match self
            .retriever
            .retrieve_k(question, self.config.rag.hybrid_k, self.config.rag.hybrid_k)
            .await
        {
            Ok(docs) => Some(build_context_with_meta(&docs)),
            Err(e) => {
                tracing::warn!(error = %e, "hybrid retrieval side failed");
                None
            }
        };

        if sql_context.is_none() && rag_context.is_none() {
            return Err(AgentError::Rag(RagError::NoDocuments));
        }

        let triplet = hybrid_prompt(
            question,
            sql_context.as_deref().unwrap_or(""),
            rag_context.as_deref().unwrap_or(""),
        );
        let answer = self
            .llm
            .generate(
                &self.config.models.answer_model,
                &triplet.system,
                triplet.developer.as_deref(),
                &triplet.user,
            )
            .await?;
        let answer = sanitize_response(&answer);
        Ok(format!("{answer}\n\n{HYBRID_SOURCE_SUFFIX}"))
    }
}
