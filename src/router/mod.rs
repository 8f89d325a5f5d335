//! Question routing: pre-checks, LLM classification, fuzzy promotion, and
//! vocabulary post-validation.
//!
//! The router runs once per request and produces an immutable
//! [`RouterDecision`]. Cheap deterministic checks (guardrail, language,
//! length) run before any model call; the classification call returns a
//! strict schema; a fast fuzzy classifier promotes borderline routes onto
//! the SQL path.

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{LimitsConfig, ModelsConfig, RouterConfig};
use crate::extract::EntityExtractor;
use crate::providers::registry::LlmClient;
use crate::providers::ProviderError;
use crate::store::vocab::{normalize_accents, VocabCache, Vocabulary};
use crate::types::{Castell, CastellStatus, Entities, RouteTool, RouterDecision, SqlQueryType};

pub mod patterns;

/// Canned refusal for guardrail hits.
pub const GUARDRAIL_MESSAGE: &str = "Sóc **el Xiquet**, un assistent especialitzat **exclusivament** en el món casteller. \n\nNomés puc respondre preguntes sobre castells, colles, diades, concursos i història castellera.\nSi tens una pregunta castellera, estaré encantat d'ajudar-te!";

/// Canned notice for over-long questions.
pub const TOO_LONG_MESSAGE: &str = "La teva pregunta és massa llarga. Si us plau, fes una pregunta més concisa i específica sobre el món casteller.";

/// Generic fallback when the decision cannot be interpreted.
pub const UNSURE_MESSAGE: &str =
    "No estic segur de com respondre aquesta pregunta, però ho estic intentant!";

/// Graceful message when the classification reply is unusable.
pub const PROCESSING_ERROR_MESSAGE: &str =
    "Ho sento, hi ha hagut un problema processant la teva pregunta. Torna-ho a provar.";

/// The known contest track names.
const CONTEST_TRACKS: &[&str] = &[
    "Jornada Diumenge Tarragona",
    "Jornada Dissabte Tarragona",
    "Jornada Torredembarra",
];

/// Promotion threshold when the model chose `direct`.
const PROMOTE_DIRECT_THRESHOLD: f64 = 0.85;
/// Promotion threshold when the model chose `rag`.
const PROMOTE_RAG_THRESHOLD: f64 = 0.80;
/// Acceptance threshold for the full query-type classifier.
const QUERY_TYPE_THRESHOLD: f64 = 0.3;

/// Routing errors surfaced to the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The classification model call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Polite refusal for an unsupported language.
pub fn language_apology(language_name: Option<&str>) -> String {
    match language_name {
        Some(name) => format!(
            "Ho sento, no parlo {name}. Només puc respondre preguntes en català i relacionades amb el món casteller. Però sempre es bon moment per apendre a parlar català!"
        ),
        None => "Ho sento, només puc respondre preguntes en català i relacionades amb el món casteller. Però sempre es bon moment per apendre a parlar català!".to_owned(),
    }
}

/// Substring guardrail over the three closed keyword lists.
pub fn is_guardrail_violation(question: &str) -> bool {
    let lowered = question.to_lowercase();
    patterns::META_LLM_KEYWORDS
        .iter()
        .chain(patterns::TECH_PROGRAMMING_KEYWORDS)
        .chain(patterns::NON_CASTELLER_DOMAINS)
        .any(|keyword| lowered.contains(keyword))
}

/// Word-boundary token count, the length pre-check metric.
pub fn count_tokens(question: &str) -> usize {
    match Regex::new(r"\w+") {
        Ok(re) => re.find_iter(question).count(),
        Err(_) => question.split_whitespace().count(),
    }
}

/// Fuzzy query-type classification against a pattern table.
///
/// Per kind: best normalized-Levenshtein similarity between the lowercased
/// question and any pattern, boosted to 0.8 on an exact substring hit.
/// Below `threshold` the result is [`SqlQueryType::Custom`].
pub fn classify_query_type(
    question: &str,
    table: &[(SqlQueryType, Vec<&'static str>)],
    threshold: f64,
) -> SqlQueryType {
    let lowered = question.to_lowercase();
    let mut best_kind = SqlQueryType::Custom;
    let mut best_score = 0.0f64;

    for (kind, phrases) in table {
        let mut score = phrases
            .iter()
            .map(|p| strsim::normalized_levenshtein(&lowered, p))
            .fold(0.0f64, f64::max);
        if phrases.iter().any(|p| lowered.contains(p)) {
            score = score.max(0.8);
        }
        if score > best_score {
            best_score = score;
            best_kind = *kind;
        }
    }

    if best_score >= threshold {
        tracing::debug!(kind = %best_kind, score = best_score, "fuzzy query-type match");
        best_kind
    } else {
        tracing::debug!(
            best = %best_kind,
            score = best_score,
            threshold,
            "no query-type match above threshold"
        );
        SqlQueryType::Custom
    }
}

// ---------------------------------------------------------------------------
// Raw (pre-validation) classification reply
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawCastell {
    #[serde(default)]
    code: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    sql_query_type: Option<String>,
    #[serde(default)]
    direct_response: String,
    #[serde(default)]
    teams: Vec<String>,
    #[serde(default)]
    constructions: Vec<RawCastell>,
    #[serde(default)]
    years: Vec<Value>,
    #[serde(default)]
    places: Vec<String>,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    editions: Vec<String>,
    #[serde(default)]
    tracks: Vec<String>,
    #[serde(default)]
    positions: Vec<Value>,
}

impl RawDecision {
    fn has_any_entity(&self) -> bool {
        !self.teams.is_empty()
            || !self.constructions.is_empty()
            || !self.years.is_empty()
            || !self.places.is_empty()
            || !self.events.is_empty()
    }
}

/// The strict schema the classification call must satisfy.
fn decision_schema(allow_hybrid: bool) -> Value {
    let mut tools = vec!["direct", "rag", "sql"];
    if allow_hybrid {
        tools.push("hybrid");
    }
    let query_types: Vec<&str> = SqlQueryType::templated()
        .iter()
        .map(|t| t.as_str())
        .chain(std::iter::once("custom"))
        .collect();

    json!({
        "type": "object",
        "properties": {
            "tool": {"type": "string", "enum": tools},
            "sql_query_type": {"type": "string", "enum": query_types},
            "direct_response": {"type": "string"},
            "teams": {"type": "array", "items": {"type": "string"}},
            "constructions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "status": {"type": ["string", "null"]}
                    },
                    "required": ["code"]
                }
            },
            "years": {"type": "array", "items": {"type": "integer"}},
            "places": {"type": "array", "items": {"type": "string"}},
            "events": {"type": "array", "items": {"type": "string"}},
            "editions": {"type": "array", "items": {"type": "string"}},
            "tracks": {"type": "array", "items": {"type": "string"}},
            "positions": {"type": "array", "items": {"type": "integer"}}
        },
        "required": ["tool", "direct_response"]
    })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// The routing stage, shared across request tasks.
pub struct Router {
    llm: LlmClient,
    vocab: Arc<VocabCache>,
    models: ModelsConfig,
    limits: LimitsConfig,
    options: RouterConfig,
}

impl Router {
    /// Create the router over shared components.
    pub fn new(
        llm: LlmClient,
        vocab: Arc<VocabCache>,
        models: ModelsConfig,
        limits: LimitsConfig,
        options: RouterConfig,
    ) -> Self {
        Self {
            llm,
            vocab,
            models,
            limits,
            options,
        }
    }

    /// Pre-checks that answer without any model call.
    ///
    /// Order: guardrail, language, length. `None` means "keep processing".
    pub fn precheck(&self, question: &str) -> Option<RouterDecision> {
        if is_guardrail_violation(question) {
            tracing::info!("guardrail hit, refusing");
            return Some(RouterDecision::direct(GUARDRAIL_MESSAGE));
        }

        match whatlang::detect(question) {
            // Only refuse on a confident detection; Catalan and its close
            // relatives often come back unreliable on short questions.
            Some(info) if info.is_reliable() => {
                let code = info.lang().code();
                if !matches!(code, "cat" | "spa" | "por") {
                    tracing::info!(language = code, "unsupported language");
                    return Some(RouterDecision::direct(language_apology(
                        patterns::language_name(code),
                    )));
                }
            }
            _ => tracing::debug!("language detection inconclusive"),
        }

        if count_tokens(question) > self.limits.max_question_tokens {
            tracing::info!("question over token limit");
            return Some(RouterDecision::direct(TOO_LONG_MESSAGE));
        }

        None
    }

    /// Decide the route for one question.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Provider`] when the classification call fails
    /// at the transport level; malformed replies degrade to a graceful
    /// `direct` decision instead.
    pub async fn decide(&self, question: &str) -> Result<RouterDecision, RouterError> {
        if let Some(decision) = self.precheck(question) {
            return Ok(decision);
        }

        let vocabulary = self.vocab.get();
        let extractor = EntityExtractor::new(Arc::clone(&vocabulary));
        let candidates = extractor.extract_all(question);

        let schema = decision_schema(self.options.allow_hybrid);
        let prompt = build_route_prompt(question, &candidates, self.options.allow_hybrid);

        let reply = match self
            .llm
            .parse(
                &self.models.router_model,
                ROUTER_SYSTEM,
                None,
                &prompt,
                &schema,
            )
            .await
        {
            Ok(value) => value,
            Err(ProviderError::Malformed(reason)) => {
                tracing::warn!(%reason, "unusable classification reply");
                return Ok(RouterDecision::direct(PROCESSING_ERROR_MESSAGE));
            }
            Err(e) => return Err(e.into()),
        };

        let raw: RawDecision = match serde_json::from_value(reply) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "classification reply shape mismatch");
                return Ok(RouterDecision::direct(PROCESSING_ERROR_MESSAGE));
            }
        };

        Ok(self.resolve(question, raw, &vocabulary))
    }

    /// Steps 6–7: SQL-type resolution, promotion, and validation.
    fn resolve(
        &self,
        question: &str,
        raw: RawDecision,
        vocabulary: &Vocabulary,
    ) -> RouterDecision {
        let mut tool = match raw.tool.as_str() {
            "direct" => RouteTool::Direct,
            "rag" => RouteTool::Rag,
            "sql" => RouteTool::Sql,
            "hybrid" if self.options.allow_hybrid => RouteTool::Hybrid,
            "hybrid" => RouteTool::Sql,
            other => {
                tracing::warn!(tool = other, "unrecognized tool, collapsing to direct");
                return RouterDecision::direct(UNSURE_MESSAGE);
            }
        };

        let mut sql_query_type = match raw.sql_query_type.as_deref().filter(|s| !s.is_empty()) {
            Some(wire) => match parse_query_type(wire) {
                Some(kind) => Some(kind),
                None => {
                    tracing::warn!(
                        sql_query_type = wire,
                        "unrecognized query type, collapsing to direct"
                    );
                    return RouterDecision::direct(UNSURE_MESSAGE);
                }
            },
            None => None,
        };

        // Borderline promotion: the model said direct/rag, but entities are
        // present and the question fits a structured pattern.
        let mut promoted = false;
        if matches!(tool, RouteTool::Direct | RouteTool::Rag) && raw.has_any_entity() {
            let threshold = if tool == RouteTool::Direct {
                PROMOTE_DIRECT_THRESHOLD
            } else {
                PROMOTE_RAG_THRESHOLD
            };
            let promoted_kind =
                classify_query_type(question, &patterns::is_sql_query_patterns(), threshold);
            if promoted_kind != SqlQueryType::Custom {
                tracing::info!(kind = %promoted_kind, "promoting decision to sql");
                tool = RouteTool::Sql;
                sql_query_type = Some(promoted_kind);
                promoted = true;
            }
        }

        if matches!(tool, RouteTool::Sql | RouteTool::Hybrid) && !promoted {
            if sql_query_type.is_none() {
                sql_query_type = Some(classify_query_type(
                    question,
                    &patterns::sql_query_patterns(),
                    QUERY_TYPE_THRESHOLD,
                ));
            }
        }

        let entities = validate_entities(&raw, vocabulary);

        // Track/position mentions mean the question is about a concrete
        // ranking, not contest history.
        if sql_query_type == Some(SqlQueryType::ContestHistory)
            && (!entities.tracks.is_empty() || !entities.positions.is_empty())
        {
            sql_query_type = Some(SqlQueryType::ContestRanking);
        }

        RouterDecision {
            tool,
            sql_query_type: sql_query_type.unwrap_or(SqlQueryType::Custom),
            direct_response: raw.direct_response,
            entities,
        }
    }
}

fn parse_query_type(wire: &str) -> Option<SqlQueryType> {
    serde_json::from_value(Value::String(wire.to_owned())).ok()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every raw entity against the canonical vocabulary; unknowns are
/// dropped, never guessed. Accent-insensitive matches recover the canonical
/// team spelling.
fn validate_entities(raw: &RawDecision, vocabulary: &Vocabulary) -> Entities {
    let teams = raw
        .teams
        .iter()
        .filter_map(|team| {
            let matched = vocabulary.match_team(team);
            if matched.is_none() {
                tracing::debug!(%team, "dropping unknown team");
            } else if matched != Some(team.as_str()) {
                tracing::debug!(%team, canonical = matched, "accent-recovered team");
            }
            matched.map(ToOwned::to_owned)
        })
        .collect();

    let constructions = raw
        .constructions
        .iter()
        .filter_map(|raw_castell| {
            let code = canonicalize_code(&raw_castell.code, vocabulary)?;
            let status = raw_castell
                .status
                .as_deref()
                .filter(|s| !s.is_empty())
                .and_then(parse_status);
            Some(Castell { code, status })
        })
        .collect();

    let years = raw
        .years
        .iter()
        .filter_map(value_to_u16)
        .filter(|year| {
            let known = vocabulary.has_year(*year);
            if !known {
                tracing::debug!(year, "dropping unknown year");
            }
            known
        })
        .collect();

    let places = raw
        .places
        .iter()
        .filter(|place| vocabulary.has_place(place))
        .cloned()
        .collect();

    let events = raw
        .events
        .iter()
        .filter(|event| vocabulary.has_event(event))
        .cloned()
        .collect();

    let tracks = raw
        .tracks
        .iter()
        .filter_map(|track| {
            CONTEST_TRACKS
                .iter()
                .find(|known| {
                    normalize_accents(known).contains(&normalize_accents(track))
                        || normalize_accents(track).contains(&normalize_accents(known))
                })
                .map(|known| (*known).to_owned())
        })
        .collect();

    Entities {
        teams,
        constructions,
        years,
        places,
        events,
        editions: raw.editions.clone(),
        tracks,
        positions: raw.positions.iter().filter_map(value_to_u32).collect(),
    }
}

/// Resolve a castell code to its canonical form.
///
/// Exact vocabulary hit wins; a code equal modulo modifier ordering is
/// mapped to the stored spelling; a bare "3de10"-style spelling recovers
/// the first canonical code containing its digits; anything else drops.
fn canonicalize_code(code: &str, vocabulary: &Vocabulary) -> Option<String> {
    if code.is_empty() {
        return None;
    }
    if vocabulary.has_construction(code) {
        return Some(code.to_owned());
    }

    if let Some((base, mods)) = split_code(code) {
        let mut sorted_mods: Vec<char> = mods.chars().collect();
        sorted_mods.sort_unstable();
        for canonical in &vocabulary.construction_codes {
            if let Some((c_base, c_mods)) = split_code(canonical) {
                let mut c_sorted: Vec<char> = c_mods.chars().collect();
                c_sorted.sort_unstable();
                if base == c_base && sorted_mods == c_sorted {
                    return Some(canonical.clone());
                }
            }
        }
    }

    let stripped = code.replace('e', "");
    if !stripped.is_empty() {
        if let Some(similar) = vocabulary
            .construction_codes
            .iter()
            .find(|c| c.contains(&stripped))
        {
            tracing::debug!(%code, canonical = %similar, "recovered similar castell code");
            return Some(similar.clone());
        }
    }

    tracing::debug!(%code, "dropping unknown castell code");
    None
}

fn split_code(code: &str) -> Option<(String, String)> {
    let re = Regex::new(r"^([0-9P]{1,2}d[0-9]{1,2})([fmpas]*)$").ok()?;
    let caps = re.captures(code)?;
    Some((
        caps.get(1).map_or("", |m| m.as_str()).to_owned(),
        caps.get(2).map_or("", |m| m.as_str()).to_owned(),
    ))
}

fn parse_status(raw: &str) -> Option<CastellStatus> {
    if let Some(status) = CastellStatus::from_db_str(raw) {
        return Some(status);
    }
    // The schema speaks Catalan, but tolerate the enum names too.
    match raw {
        "Completed" => Some(CastellStatus::Completed),
        "Loaded" => Some(CastellStatus::Loaded),
        "Attempt" => Some(CastellStatus::Attempt),
        "AttemptDismantled" => Some(CastellStatus::AttemptDismantled),
        other => {
            tracing::debug!(status = other, "blanking invalid status");
            None
        }
    }
}

fn value_to_u16(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Persona for the classification call.
const ROUTER_SYSTEM: &str =
    "Ets el Xiquet, un assistent expert en el món casteller. Respon sempre en català.";

/// Assemble the classification prompt: candidate entities per kind (only
/// the kinds with candidates), tool choice rules, and the reply contract.
fn build_route_prompt(question: &str, candidates: &Entities, allow_hybrid: bool) -> String {
    let mut entity_sections = String::new();

    if !candidates.teams.is_empty() {
        entity_sections.push_str(&format!(
            "- **teams**: noms de colles castelleres. Possibles opcions: {:?}\n",
            candidates.teams
        ));
    }
    if !candidates.constructions.is_empty() {
        let codes: Vec<&str> = candidates
            .constructions
            .iter()
            .map(|c| c.code.as_str())
            .collect();
        entity_sections.push_str(&format!(
            "- **constructions**: castells amb estat opcional. Possibles opcions: {codes:?}. Cada castell pot tenir un estat: Descarregat, Carregat, Intent, Intent desmuntat, o cap estat (posa null).\n",
        ));
    }
    if !candidates.years.is_empty() {
        entity_sections.push_str(
            "- **years**: anys concrets d'una actuació o referència temporal (per exemple 2023, 2024).\n",
        );
    }
    if !candidates.places.is_empty() {
        entity_sections.push_str(&format!(
            "- **places**: ciutats o poblacions d'actuacions. Possibles opcions: {:?}\n",
            candidates.places
        ));
    }
    if !candidates.events.is_empty() {
        entity_sections.push_str(&format!(
            "- **events**: noms de diades castelleres. Possibles opcions: {:?}\n",
            candidates.events
        ));
    }

    let lowered = question.to_lowercase();
    if lowered.contains("concurs") {
        entity_sections.push_str(
            "Si la pregunta és sobre un concurs de castells, afegeix també:\n\
             - **editions**: edició del concurs (I, II, III, IV, ...).\n\
             - **tracks**: jornada del concurs ('Jornada Diumenge Tarragona', 'Jornada Dissabte Tarragona', 'Jornada Torredembarra').\n\
             - **positions**: posició a la classificació (1, 2, 3, ...).\n",
        );
    }

    let hybrid_rule = if allow_hybrid {
        "\n- **\"hybrid\"**: si la pregunta necessita alhora dades de la base de dades i context descriptiu."
    } else {
        ""
    };

    format!(
        r#"La teva tasca és analitzar la següent pregunta sobre castells:
> "{question}"

### 1. Identificació d'entitats
Analitza la pregunta i identifica, si n'hi ha, els elements següents. Mapeja cada referència exactament a un element de la seva llista d'opcions; les llistes sense opcions queden buides.
{entity_sections}
IMPORTANT: no confonguis el nom d'una colla amb una localitat o una diada. Si la pregunta parla dels "Castellers de Sabadell", no extreguis "Sabadell" com a lloc.

### 2. Elecció de l'eina
- **"sql"**: si la pregunta demana informació quantitativa o estadística (millor actuació, millor castell, rànquings, quants cops s'ha fet un castell, resums de temporada, estadístiques, concursos). Prioritza sql en cas de dubte.
- **"rag"**: si la pregunta demana coneixement textual o descriptiu (història, valors, conceptes generals).
- **"direct"**: si la pregunta és molt general, bàsica o no relacionada amb castells.{hybrid_rule}

### 3. Format de resposta
Respon exclusivament en format JSON amb els camps: tool, sql_query_type, direct_response, teams, constructions, years, places, events, editions, tracks, positions.
- Si tool és "direct", posa una resposta breu i clara a direct_response.
- Totes les llistes contenen només elements exactes de les opcions, o queden buides."#
    )
}
