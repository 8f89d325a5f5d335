//! LLM-authored SELECT fallback for questions no template covers.
//!
//! The model sees the schema, the validated entities, and the question, and
//! must emit a single SELECT with `%(name)s` placeholders. The reply is
//! fence-stripped, checked to be a lone SELECT, and every placeholder is
//! rewritten to a `$n` bind resolved from the entity-derived parameter map.

use regex::Regex;
use serde_json::json;

use crate::extract::castell::code_to_name;
use crate::providers::registry::LlmClient;
use crate::providers::strip_code_fences;
use crate::store::{SqlParam, SqlQuery};
use crate::types::Entities;

use super::SqlGenError;

/// Maximum rows the custom query may return.
const CUSTOM_ROW_CAP: usize = 15;

/// Schema summary shown to the generation model.
const DB_SCHEMA_DESCRIPTION: &str = r#"Tables:
- colles(id SERIAL PRIMARY KEY, name TEXT)
- events(id SERIAL PRIMARY KEY, name TEXT, date TEXT, city TEXT, place TEXT)
- event_colles(id SERIAL PRIMARY KEY, event_fk INTEGER, colla_fk INTEGER)
- castells(id SERIAL PRIMARY KEY, event_colla_fk INTEGER, castell_name TEXT, status TEXT)
- puntuacions(castell_code TEXT, castell_code_external TEXT, castell_code_name TEXT, punts_descarregat INTEGER, punts_carregat INTEGER)
- concurs(id SERIAL PRIMARY KEY, edition TEXT, title TEXT, date TEXT, location TEXT, colla_guanyadora TEXT, num_colles INTEGER, castells_intentats INTEGER, maxim_castell TEXT, espectadors TEXT)
- concurs_rankings(id SERIAL PRIMARY KEY, concurs_fk INTEGER, colla_fk INTEGER, position INTEGER, colla_name TEXT, total_points INTEGER, "any" INTEGER, jornada TEXT, ronda_1_json TEXT, ronda_2_json TEXT, ronda_3_json TEXT, ronda_4_json TEXT, ronda_5_json TEXT, ronda_6_json TEXT, ronda_7_json TEXT, ronda_8_json TEXT, rondes_json TEXT)"#;

/// System persona for the generation call.
const CUSTOM_SQL_SYSTEM: &str =
    "Ets un expert en bases de dades castelleres. Respon sempre en català.";

/// Entity values keyed by every placeholder alias the model may use.
struct ParamMap {
    entries: Vec<(&'static str, SqlParam)>,
}

impl ParamMap {
    fn from_entities(entities: &Entities) -> Self {
        let mut entries: Vec<(&'static str, SqlParam)> = Vec::new();

        if let Some(team) = entities.teams.first() {
            for alias in ["colla_name", "nom", "colla"] {
                entries.push((alias, SqlParam::Text(team.clone())));
            }
        }
        if let Some(year) = entities.years.first() {
            for alias in ["year", "any"] {
                entries.push((alias, SqlParam::Int(i64::from(*year))));
            }
        }
        if let Some(place) = entities.places.first() {
            for alias in ["city", "place", "lloc"] {
                entries.push((alias, SqlParam::Text(place.clone())));
            }
        }
        if let Some(event) = entities.events.first() {
            for alias in ["diada_name", "diada"] {
                entries.push((alias, SqlParam::Text(event.clone())));
            }
        }
        if let Some(castell) = entities.constructions.first() {
            entries.push((
                "castell_name",
                SqlParam::Text(code_to_name(&castell.code).to_owned()),
            ));
            entries.push(("castell", SqlParam::Text(castell.code.clone())));
            if let Some(status) = castell.status {
                entries.push(("status", SqlParam::Text(status.as_db_str().to_owned())));
            }
        }

        Self { entries }
    }

    fn get(&self, name: &str) -> Option<&SqlParam> {
        self.entries
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, value)| value)
    }
}

fn serializable_entities(entities: &Entities) -> serde_json::Value {
    let constructions: Vec<serde_json::Value> = entities
        .constructions
        .iter()
        .map(|c| match c.status {
            Some(status) => json!({"code": c.code, "status": status.as_db_str()}),
            None => json!({"code": c.code}),
        })
        .collect();

    json!({
        "teams": entities.teams,
        "constructions": constructions,
        "years": entities.years,
        "places": entities.places,
        "events": entities.events,
        "editions": entities.editions,
        "tracks": entities.tracks,
        "positions": entities.positions,
    })
}

fn build_prompt(question: &str, entities: &Entities) -> String {
    let entities_json = serde_json::to_string_pretty(&serializable_entities(entities))
        .unwrap_or_else(|_| "{}".to_owned());

    format!(
        r#"Tens una base de dades PostgreSQL amb l'estructura següent:

{DB_SCHEMA_DESCRIPTION}

L'usuari ha fet la pregunta:
> "{question}"

Entitats detectades:
{entities_json}

Genera una única consulta SQL completa i vàlida per PostgreSQL que respongui aquesta pregunta.
- Usa noms exactes de taules i columnes segons l'esquema.
- Si cal filtrar per any, pots utilitzar `EXTRACT(YEAR FROM TO_DATE(e.date, 'DD/MM/YYYY')) = %(year)s`.
- Fes JOINs només si són necessaris.
- Prioritza les columnes `punts_descarregat` i `punts_carregat` de la taula `puntuacions` per calcular el millor castell.
- Per unir castells amb puntuacions, usa `c.castell_name = p.castell_code_name`.
- Els valors de status són: 'Descarregat', 'Carregat', 'Intent desmuntat', 'Intent'.
- No facis DROP, DELETE ni UPDATE.
- La consulta ha de retornar un màxim de {CUSTOM_ROW_CAP} files.
- Utilitza paràmetres amb `%(nom)s` en lloc d'inserir valors directament.
- Si no tens tots els paràmetres necessaris, simplifica la consulta o usa LIKE per fer cerques més flexibles.
- Si la pregunta és sobre actuacions, inclou informació contextual: e.name, e.date, e.place, e.city, co.name, c.castell_name.
- Quan la pregunta és sobre el "millor castell aconseguit": aconseguit = status 'Descarregat' o 'Carregat'; un 'Intent desmuntat' NO és aconseguit. Inclou sempre el nom de la colla.
- Retorna només el codi SQL, sense comentaris ni explicacions."#
    )
}

/// Keywords that must never appear in a generated query.
const FORBIDDEN: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
];

/// Validate the model's SQL and rewrite `%(name)s` placeholders to binds.
///
/// # Errors
///
/// [`SqlGenError::Rejected`] for non-SELECT output, multiple statements,
/// write keywords, or a placeholder with no parameter value.
pub fn prepare_custom_sql(raw_sql: &str, entities: &Entities) -> Result<SqlQuery, SqlGenError> {
    let cleaned = strip_code_fences(raw_sql);
    let cleaned = cleaned.trim().trim_end_matches(';').trim();

    if !cleaned.to_uppercase().starts_with("SELECT") && !cleaned.to_uppercase().starts_with("WITH")
    {
        return Err(SqlGenError::Rejected(
            "generated query is not a SELECT".to_owned(),
        ));
    }
    if cleaned.contains(';') {
        return Err(SqlGenError::Rejected(
            "generated query contains multiple statements".to_owned(),
        ));
    }
    let lowered = cleaned.to_lowercase();
    for keyword in FORBIDDEN {
        let pattern = format!(r"\b{keyword}\b");
        if Regex::new(&pattern)
            .map(|re| re.is_match(&lowered))
            .unwrap_or(false)
        {
            return Err(SqlGenError::Rejected(format!(
                "generated query contains forbidden keyword '{keyword}'"
            )));
        }
    }

    let params_map = ParamMap::from_entities(entities);
    let placeholder_re = Regex::new(r"%\((\w+)\)s")
        .map_err(|e| SqlGenError::Rejected(format!("bad placeholder pattern: {e}")))?;

    let mut params: Vec<SqlParam> = Vec::new();
    let mut sql = String::with_capacity(cleaned.len());
    let mut last_end = 0;
    for caps in placeholder_re.captures_iter(cleaned) {
        let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let name = caps.get(1).map_or("", |m| m.as_str());
        let value = params_map.get(name).ok_or_else(|| {
            SqlGenError::Rejected(format!("no value for placeholder '{name}'"))
        })?;
        params.push(value.clone());
        sql.push_str(&cleaned[last_end..whole.0]);
        sql.push_str(&format!("${}", params.len()));
        last_end = whole.1;
    }
    sql.push_str(&cleaned[last_end..]);

    Ok(SqlQuery { sql, params })
}

/// Ask the model for a custom SELECT and prepare it for execution.
///
/// # Errors
///
/// [`SqlGenError::Provider`] on call failure; [`SqlGenError::Rejected`]
/// when the reply fails the safety checks.
pub async fn generate(
    llm: &LlmClient,
    model_spec: &str,
    question: &str,
    entities: &Entities,
) -> Result<SqlQuery, SqlGenError> {
    let prompt = build_prompt(question, entities);
    let raw_sql = llm
        .generate(model_spec, CUSTOM_SQL_SYSTEM, None, &prompt)
        .await?;
    tracing::debug!(sql = %raw_sql.chars().take(200).collect::<String>(), "custom SQL generated");
    prepare_custom_sql(&raw_sql, entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Castell, CastellStatus};

    fn entities() -> Entities {
        Entities {
            teams: vec!["Castellers de Vilafranca".to_owned()],
            constructions: vec![Castell::with_status("3d9f", CastellStatus::Completed)],
            years: vec![2023],
            places: vec!["Tarragona".to_owned()],
            events: vec![],
            editions: vec![],
            tracks: vec![],
            positions: vec![],
        }
    }

    #[test]
    fn test_placeholder_rewrite() {
        let raw = "SELECT co.name FROM colles co WHERE co.name = %(colla_name)s AND %(year)s = 2023";
        let query = prepare_custom_sql(raw, &entities()).expect("prepare");
        assert_eq!(
            query.sql,
            "SELECT co.name FROM colles co WHERE co.name = $1 AND $2 = 2023"
        );
        assert_eq!(
            query.params,
            vec![
                SqlParam::Text("Castellers de Vilafranca".to_owned()),
                SqlParam::Int(2023),
            ]
        );
    }

    #[test]
    fn test_alias_resolution() {
        let raw = "SELECT 1 FROM castells c WHERE c.castell_name = %(castell_name)s AND c.status = %(status)s";
        let query = prepare_custom_sql(raw, &entities()).expect("prepare");
        assert_eq!(
            query.params,
            vec![
                SqlParam::Text("3de9f".to_owned()),
                SqlParam::Text("Descarregat".to_owned()),
            ]
        );
    }

    #[test]
    fn test_code_fences_are_stripped() {
        let raw = "```sql\nSELECT name FROM colles\n```";
        let query = prepare_custom_sql(raw, &entities()).expect("prepare");
        assert_eq!(query.sql, "SELECT name FROM colles");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_rejects_non_select() {
        let result = prepare_custom_sql("EXPLAIN SELECT 1", &entities());
        assert!(matches!(result, Err(SqlGenError::Rejected(_))));
    }

    #[test]
    fn test_rejects_write_statements() {
        for statement in [
            "SELECT 1; DELETE FROM colles",
            "SELECT * FROM colles WHERE id IN (SELECT id FROM colles); DROP TABLE colles",
        ] {
            assert!(
                matches!(
                    prepare_custom_sql(statement, &entities()),
                    Err(SqlGenError::Rejected(_))
                ),
                "accepted: {statement}"
            );
        }
    }

    #[test]
    fn test_rejects_forbidden_keywords_in_select() {
        let result = prepare_custom_sql(
            "SELECT 1 WHERE EXISTS (SELECT 1) AND 'x' = 'y' OR 1 = (SELECT 1) -- update colles",
            &entities(),
        );
        assert!(matches!(result, Err(SqlGenError::Rejected(_))));
    }

    #[test]
    fn test_rejects_unknown_placeholder() {
        let result = prepare_custom_sql(
            "SELECT 1 FROM colles WHERE name = %(mystery)s",
            &entities(),
        );
        assert!(matches!(result, Err(SqlGenError::Rejected(_))));
    }

    #[test]
    fn test_trailing_semicolon_tolerated() {
        let query = prepare_custom_sql("SELECT name FROM colles;", &entities()).expect("prepare");
        assert_eq!(query.sql, "SELECT name FROM colles");
    }
}
