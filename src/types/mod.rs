//! Core domain types shared across the question-answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a castell in a performance.
///
/// Stored in the database (and shown to users) in its Catalan form; the enum
/// carries the canonical English names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastellStatus {
    /// Fully completed and dismantled (`Descarregat`) — maximum value.
    Completed,
    /// Crowned but not dismantled cleanly (`Carregat`).
    Loaded,
    /// Attempted, never crowned (`Intent`).
    Attempt,
    /// Attempt abandoned and dismantled (`Intent desmuntat`).
    AttemptDismantled,
}

impl CastellStatus {
    /// The stored Catalan form used by the relational schema.
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Completed => "Descarregat",
            Self::Loaded => "Carregat",
            Self::Attempt => "Intent",
            Self::AttemptDismantled => "Intent desmuntat",
        }
    }

    /// Parse the stored Catalan form. Returns `None` for anything outside
    /// the closed status set.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "Descarregat" => Some(Self::Completed),
            "Carregat" => Some(Self::Loaded),
            "Intent" => Some(Self::Attempt),
            "Intent desmuntat" => Some(Self::AttemptDismantled),
            _ => None,
        }
    }
}

impl std::fmt::Display for CastellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A castell reference extracted from a question: a canonical short code
/// (`3d9f`, `Pd7f`, ...) plus the status the question asked about, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Castell {
    /// Canonical short code (`WdH[modifiers]` or `PdH[modifiers]`).
    pub code: String,
    /// Status mentioned alongside the castell, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CastellStatus>,
}

impl Castell {
    /// A castell with no status constraint.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: None,
        }
    }

    /// A castell constrained to a status.
    pub fn with_status(code: impl Into<String>, status: CastellStatus) -> Self {
        Self {
            code: code.into(),
            status: Some(status),
        }
    }
}

/// Entities recognized in a question. Every value is request-scoped and must
/// come from the canonical vocabulary for its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    /// Canonical team (colla) names.
    pub teams: Vec<String>,
    /// Castell codes with optional status, in extraction order.
    pub constructions: Vec<Castell>,
    /// Four-digit years.
    pub years: Vec<u16>,
    /// Canonical city names.
    pub places: Vec<String>,
    /// Canonical event (diada) names.
    pub events: Vec<String>,
    /// Contest edition labels (roman numerals as stored).
    pub editions: Vec<String>,
    /// Contest track (jornada) names.
    pub tracks: Vec<String>,
    /// Contest ranking positions.
    pub positions: Vec<u32>,
}

impl Entities {
    /// True when no entity of any kind was recognized.
    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
            && self.constructions.is_empty()
            && self.years.is_empty()
            && self.places.is_empty()
            && self.events.is_empty()
            && self.editions.is_empty()
            && self.tracks.is_empty()
            && self.positions.is_empty()
    }

    /// True when any of the performance-table entity kinds is present
    /// (the trigger for structured-question promotion).
    pub fn has_core_entities(&self) -> bool {
        !self.teams.is_empty()
            || !self.constructions.is_empty()
            || !self.years.is_empty()
            || !self.places.is_empty()
            || !self.events.is_empty()
    }
}

/// The retrieval strategy chosen by the router for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTool {
    /// Answer directly with canned or model-authored text.
    Direct,
    /// Free-text semantic retrieval.
    Rag,
    /// Parameterized structured query.
    Sql,
    /// SQL and RAG combined.
    Hybrid,
}

impl RouteTool {
    /// The wire name used in responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Rag => "rag",
            Self::Sql => "sql",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for RouteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized structured-question patterns, each mapped to a SQL template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SqlQueryType {
    /// Best performance of a team / year / place.
    BestEvent,
    /// Best single castell.
    BestConstruction,
    /// How many times a castell has been done.
    ConstructionHistory,
    /// Which year or place saw the best performance.
    LocationPerformances,
    /// First time a castell was achieved.
    FirstConstruction,
    /// Full statistics for one castell.
    ConstructionStatistics,
    /// Season summary for a year.
    YearSummary,
    /// Contest classification queries.
    ContestRanking,
    /// Contest history and per-edition statistics.
    ContestHistory,
    /// No template matches; the query is LLM-authored.
    Custom,
}

impl SqlQueryType {
    /// The wire name used in responses and prompt tables.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestEvent => "bestEvent",
            Self::BestConstruction => "bestConstruction",
            Self::ConstructionHistory => "constructionHistory",
            Self::LocationPerformances => "locationPerformances",
            Self::FirstConstruction => "firstConstruction",
            Self::ConstructionStatistics => "constructionStatistics",
            Self::YearSummary => "yearSummary",
            Self::ContestRanking => "contestRanking",
            Self::ContestHistory => "contestHistory",
            Self::Custom => "custom",
        }
    }

    /// All template-backed kinds (everything except [`Self::Custom`]).
    pub fn templated() -> &'static [Self] {
        &[
            Self::BestEvent,
            Self::BestConstruction,
            Self::ConstructionHistory,
            Self::LocationPerformances,
            Self::FirstConstruction,
            Self::ConstructionStatistics,
            Self::YearSummary,
            Self::ContestRanking,
            Self::ContestHistory,
        ]
    }
}

impl std::fmt::Display for SqlQueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The router's decision for one question. Produced once, then immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDecision {
    /// Strategy to execute.
    pub tool: RouteTool,
    /// Structured-query kind when `tool` is `sql` or `hybrid`.
    pub sql_query_type: SqlQueryType,
    /// Canned or model-authored text for the `direct` route.
    pub direct_response: String,
    /// Validated entities.
    pub entities: Entities,
}

impl RouterDecision {
    /// A `direct` decision carrying a fixed message and no entities.
    pub fn direct(message: impl Into<String>) -> Self {
        Self {
            tool: RouteTool::Direct,
            sql_query_type: SqlQueryType::Custom,
            direct_response: message.into(),
            entities: Entities::default(),
        }
    }
}

/// Context from the previous turn, supplied by the chat surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviousContext {
    /// Previous question text.
    pub question: Option<String>,
    /// Previous answer text.
    pub response: Option<String>,
    /// Route used for the previous turn.
    pub route: Option<String>,
    /// SQL query type of the previous turn, if any.
    pub sql_query_type: Option<String>,
    /// Entities identified in the previous turn.
    pub entities: Option<Entities>,
}

/// An inbound question.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRequest {
    /// Free-form question text.
    pub content: String,
    /// Chat session identifier, when the surface tracks one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Previous-turn context for follow-up questions.
    #[serde(default)]
    pub previous_context: Option<PreviousContext>,
}

impl QuestionRequest {
    /// A bare request with no session context.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            session_id: None,
            previous_context: None,
        }
    }
}

/// Structured rows attached to a response for UI rendering, bypassing
/// the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    /// Table heading.
    pub title: String,
    /// Display column names, in order.
    pub columns: Vec<String>,
    /// Stringified cells; missing values render as `"-"`.
    pub rows: Vec<Vec<String>>,
}

/// Entities surfaced back to the UI alongside the answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifiedEntities {
    /// Team names.
    pub teams: Vec<String>,
    /// Castells with optional status.
    pub constructions: Vec<Castell>,
    /// Years.
    pub years: Vec<u16>,
    /// City names.
    pub places: Vec<String>,
    /// Event names.
    pub events: Vec<String>,
    /// SQL query type, when a structured route ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query_type: Option<String>,
}

impl IdentifiedEntities {
    /// Project the router's validated entities into the UI shape.
    pub fn from_entities(entities: &Entities, sql_query_type: Option<SqlQueryType>) -> Self {
        Self {
            teams: entities.teams.clone(),
            constructions: entities.constructions.clone(),
            years: entities.years.clone(),
            places: entities.places.clone(),
            events: entities.events.clone(),
            sql_query_type: sql_query_type.map(|t| t.as_str().to_owned()),
        }
    }
}

/// The full answer for one question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResponse {
    /// Response identifier.
    pub id: String,
    /// Echo of the question text.
    pub content: String,
    /// Final prose answer.
    pub response: String,
    /// Route that produced the answer (`direct`, `rag`, `sql`, `hybrid`,
    /// or `error`).
    pub route_used: String,
    /// Wall-clock processing time.
    pub response_time_ms: u64,
    /// Session echo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Structured rows for the UI, present on successful SQL paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_data: Option<TableData>,
    /// Entities the router recognized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identified_entities: Option<IdentifiedEntities>,
    /// Response creation time.
    pub timestamp: DateTime<Utc>,
}

/// Route preview returned by the routing-only entry point.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePreview {
    /// Route the full pipeline would take.
    pub route_used: String,
    /// Entities the router recognized.
    pub identified_entities: IdentifiedEntities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_round_trip() {
        for status in [
            CastellStatus::Completed,
            CastellStatus::Loaded,
            CastellStatus::Attempt,
            CastellStatus::AttemptDismantled,
        ] {
            assert_eq!(CastellStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(CastellStatus::from_db_str("Coronat"), None);
    }

    #[test]
    fn test_route_tool_wire_names() {
        assert_eq!(RouteTool::Direct.as_str(), "direct");
        assert_eq!(RouteTool::Hybrid.as_str(), "hybrid");
        let json = serde_json::to_string(&RouteTool::Rag).expect("serialize");
        assert_eq!(json, "\"rag\"");
    }

    #[test]
    fn test_sql_query_type_wire_names() {
        let json = serde_json::to_string(&SqlQueryType::BestEvent).expect("serialize");
        assert_eq!(json, "\"bestEvent\"");
        let parsed: SqlQueryType =
            serde_json::from_str("\"contestRanking\"").expect("deserialize");
        assert_eq!(parsed, SqlQueryType::ContestRanking);
    }

    #[test]
    fn test_entities_emptiness() {
        let mut entities = Entities::default();
        assert!(entities.is_empty());
        assert!(!entities.has_core_entities());

        entities.tracks.push("Jornada Torredembarra".to_owned());
        assert!(!entities.is_empty());
        assert!(!entities.has_core_entities());

        entities.teams.push("Castellers de Vilafranca".to_owned());
        assert!(entities.has_core_entities());
    }

    #[test]
    fn test_direct_decision_shape() {
        let decision = RouterDecision::direct("hola");
        assert_eq!(decision.tool, RouteTool::Direct);
        assert_eq!(decision.sql_query_type, SqlQueryType::Custom);
        assert!(decision.entities.is_empty());
    }
}
