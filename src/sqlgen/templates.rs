//! The fixed query templates, one per recognized structured-question kind.
//!
//! Skeletons carry named `{hole}` slots for filter fragments plus a bound
//! `{limit}`. Fragments render `$n` placeholders in skeleton order and push
//! their values onto the bind list, so multi-value filters become expanded
//! `IN ($i, $j)` lists and `LIKE` patterns are concatenated server-side
//! around a bound value.
//!
//! The castell→score join matches on any of the three equivalent code
//! columns, which keeps the per-column indexes usable.

use regex::Regex;

use crate::extract::castell::code_to_name;
use crate::store::{SqlParam, SqlQuery};
use crate::types::{CastellStatus, Entities, SqlQueryType};

use super::SqlGenError;

/// Entity kinds a template can require or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Team names.
    Team,
    /// Castell codes.
    Construction,
    /// Years.
    Year,
    /// City names.
    Place,
    /// Event names.
    Event,
    /// Contest editions.
    Edition,
    /// Contest tracks.
    Track,
    /// Contest positions.
    Position,
}

impl ParamKind {
    fn name(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Construction => "construction",
            Self::Year => "year",
            Self::Place => "place",
            Self::Event => "event",
            Self::Edition => "edition",
            Self::Track => "track",
            Self::Position => "position",
        }
    }

    fn present_in(self, entities: &Entities) -> bool {
        match self {
            Self::Team => !entities.teams.is_empty(),
            Self::Construction => !entities.constructions.is_empty(),
            Self::Year => !entities.years.is_empty(),
            Self::Place => !entities.places.is_empty(),
            Self::Event => !entities.events.is_empty(),
            Self::Edition => !entities.editions.is_empty(),
            Self::Track => !entities.tracks.is_empty(),
            Self::Position => !entities.positions.is_empty(),
        }
    }
}

/// A parameterized query template.
pub struct QueryTemplate {
    /// The question kind this template answers.
    pub kind: SqlQueryType,
    /// SQL skeleton with named `{hole}` slots.
    pub skeleton: &'static str,
    /// Entity kinds that must be present for the template to apply.
    pub required: &'static [ParamKind],
    /// Entity kinds the template filters on when present.
    pub optional: &'static [ParamKind],
    /// Row cap bound as the `{limit}` parameter.
    pub default_limit: i64,
}

const SCORE_JOIN: &str = "LEFT JOIN puntuacions p ON (\n    c.castell_name = p.castell_code_external\n    OR c.castell_name = p.castell_code\n    OR c.castell_name = p.castell_code_name\n)";

const BEST_EVENT_SKELETON: &str = r#"WITH castells_punts AS (
    SELECT
        e.id AS event_id,
        e.name AS event_name,
        e.date AS event_date,
        e.place AS event_place,
        e.city AS event_city,
        co.id AS colla_id,
        co.name AS colla_name,
        c.id AS castell_id,
        c.castell_name,
        c.status,
        CASE
            WHEN c.status = 'Descarregat' THEN COALESCE(p.punts_descarregat, 0)
            WHEN c.status = 'Carregat' THEN COALESCE(p.punts_carregat, 0)
            ELSE 0
        END AS punts,
        ROW_NUMBER() OVER (
            PARTITION BY e.id, co.id
            ORDER BY
                CASE
                    WHEN c.status = 'Descarregat' THEN COALESCE(p.punts_descarregat, 0)
                    WHEN c.status = 'Carregat' THEN COALESCE(p.punts_carregat, 0)
                    ELSE 0
                END DESC
        ) AS rn
    FROM events e
    JOIN event_colles ec ON e.id = ec.event_fk
    JOIN colles co ON ec.colla_fk = co.id
    JOIN castells c ON ec.id = c.event_colla_fk
    {score_join}
    WHERE 1=1
    {team_filter}
    {year_filter}
    {place_filter}
    {event_filter}
)
SELECT
    event_id,
    event_name,
    event_date,
    colla_name,
    event_place,
    event_city,
    STRING_AGG(
        CASE
            WHEN castell_name != 'Pde4' THEN castell_name || ' (' || status || ')'
            ELSE NULL
        END,
        ', '
        ORDER BY punts DESC
    ) AS castells_fets,
    COUNT(castell_id) AS num_castells,
    SUM(CASE WHEN rn <= 4 THEN punts ELSE 0 END) AS total_punts
FROM castells_punts
GROUP BY event_id, event_name, event_date, event_place, event_city, colla_name
HAVING 1=1
{construction_having_filter}
ORDER BY total_punts DESC
LIMIT {limit}"#;

const BEST_CONSTRUCTION_SKELETON: &str = r#"SELECT
    e.name AS event_name,
    e.date,
    e.place,
    e.city,
    co.name AS colla_name,
    c.castell_name,
    c.status,
    COALESCE(p.punts_descarregat, 0) AS punts_descarregat,
    COALESCE(p.punts_carregat, 0) AS punts_carregat
FROM castells c
JOIN event_colles ec ON c.event_colla_fk = ec.id
JOIN events e ON ec.event_fk = e.id
JOIN colles co ON ec.colla_fk = co.id
{score_join}
WHERE 1=1
{team_filter}
{year_filter}
{place_filter}
{event_filter}
{status_filter}
ORDER BY
    CASE
        WHEN c.status = 'Descarregat' THEN COALESCE(p.punts_descarregat, 0)
        WHEN c.status = 'Carregat' THEN COALESCE(p.punts_carregat, 0)
        ELSE 0
    END DESC
LIMIT {limit}"#;

const CONSTRUCTION_HISTORY_SKELETON: &str = r#"SELECT
    c.castell_name,
    c.status,
    COUNT(*) AS count_occurrences,
    co.name AS colla_name,
    MIN(e.date) AS first_date,
    MAX(e.date) AS last_date,
    STRING_AGG(DISTINCT e.city, ', ') AS cities
FROM castells c
JOIN event_colles ec ON c.event_colla_fk = ec.id
JOIN events e ON ec.event_fk = e.id
JOIN colles co ON ec.colla_fk = co.id
WHERE 1=1
{team_filter}
{construction_filter}
{year_filter}
{place_filter}
{status_filter}
GROUP BY c.castell_name, c.status, co.name
ORDER BY count_occurrences DESC, c.castell_name, c.status
LIMIT {limit}"#;

const LOCATION_PERFORMANCES_SKELETON: &str = r#"SELECT
    EXTRACT(YEAR FROM TO_DATE(e.date, 'DD/MM/YYYY'))::int AS year,
    e.name AS event_name,
    e.date,
    e.place,
    e.city,
    co.name AS colla_name,
    COUNT(c.id) AS num_castells,
    STRING_AGG(
        CASE
            WHEN c.castell_name != 'Pde4' THEN c.castell_name || ' (' || c.status || ')'
            ELSE NULL
        END,
        ', '
        ORDER BY
            CASE
                WHEN c.status = 'Descarregat' THEN COALESCE(p.punts_descarregat, 0)
                WHEN c.status = 'Carregat' THEN COALESCE(p.punts_carregat, 0)
                ELSE 0
            END DESC
    ) AS castells_fets
FROM events e
JOIN event_colles ec ON e.id = ec.event_fk
JOIN colles co ON ec.colla_fk = co.id
JOIN castells c ON ec.id = c.event_colla_fk
{score_join}
WHERE 1=1
{team_filter}
{year_filter}
{place_filter}
GROUP BY e.id, e.name, e.date, e.place, e.city, co.name
ORDER BY SUM(
    CASE
        WHEN c.status = 'Descarregat' AND c.castell_name != 'Pde4' THEN COALESCE(p.punts_descarregat, 0)
        WHEN c.status = 'Carregat' AND c.castell_name != 'Pde4' THEN COALESCE(p.punts_carregat, 0)
        ELSE 0
    END
) DESC, e.date DESC
LIMIT {limit}"#;

const YEAR_SUMMARY_SKELETON: &str = r#"SELECT
    co.name AS colla_name,
    COUNT(DISTINCT e.id) AS num_actuacions,
    COUNT(c.id) AS num_castells,
    SUM(CASE WHEN c.status = 'Descarregat' THEN 1 ELSE 0 END) AS castells_descarregats,
    SUM(CASE WHEN c.status = 'Carregat' THEN 1 ELSE 0 END) AS castells_carregats,
    SUM(CASE WHEN c.status = 'Intent desmuntat' THEN 1 ELSE 0 END) AS castells_intent_desmuntat,
    SUM(CASE WHEN c.status = 'Intent' THEN 1 ELSE 0 END) AS castells_intent
FROM colles co
JOIN event_colles ec ON co.id = ec.colla_fk
JOIN events e ON ec.event_fk = e.id
JOIN castells c ON ec.id = c.event_colla_fk
{score_join}
WHERE 1=1
{year_filter}
{place_filter}
{team_filter}
GROUP BY co.id, co.name
ORDER BY SUM(
    CASE
        WHEN c.status = 'Descarregat' AND c.castell_name != 'Pde4' THEN COALESCE(p.punts_descarregat, 0)
        WHEN c.status = 'Carregat' AND c.castell_name != 'Pde4' THEN COALESCE(p.punts_carregat, 0)
        ELSE 0
    END
) DESC
LIMIT {limit}"#;

const FIRST_CONSTRUCTION_SKELETON: &str = r#"SELECT
    EXTRACT(YEAR FROM TO_DATE(e.date, 'DD/MM/YYYY'))::int AS year,
    e.name AS event_name,
    e.date,
    e.place,
    e.city,
    co.name AS colla_name,
    c.castell_name,
    c.status
FROM castells c
JOIN event_colles ec ON c.event_colla_fk = ec.id
JOIN events e ON ec.event_fk = e.id
JOIN colles co ON ec.colla_fk = co.id
WHERE 1=1
{team_filter}
{construction_filter}
{place_filter}
{event_filter}
{status_filter}
ORDER BY TO_DATE(e.date, 'DD/MM/YYYY') ASC
LIMIT 1"#;

const CONSTRUCTION_STATISTICS_SKELETON: &str = r#"SELECT
    c.castell_name,
    COUNT(CASE WHEN c.status = 'Descarregat' THEN 1 END) AS cops_descarregat,
    COUNT(CASE WHEN c.status = 'Carregat' THEN 1 END) AS cops_carregat,
    COUNT(CASE WHEN c.status = 'Intent desmuntat' THEN 1 END) AS cops_intent_desmuntat,
    COUNT(CASE WHEN c.status = 'Intent' THEN 1 END) AS cops_intent,
    MIN(CASE WHEN c.status = 'Descarregat' THEN e.date END) AS primera_data_descarregat,
    MIN(CASE WHEN c.status = 'Carregat' THEN e.date END) AS primera_data_carregat,
    COUNT(DISTINCT CASE WHEN c.status = 'Descarregat' THEN co.name END) AS colles_descarregat,
    COUNT(DISTINCT CASE WHEN c.status = 'Carregat' THEN co.name END) AS colles_carregat,
    COUNT(DISTINCT CASE WHEN c.status = 'Intent desmuntat' OR c.status = 'Intent' THEN co.name END) AS colles_intentat,
    COUNT(DISTINCT CASE WHEN c.status = 'Descarregat' OR c.status = 'Carregat' THEN co.name END) AS total_colles_carregat_o_descarregat,
    SUBSTR(STRING_AGG(DISTINCT CASE WHEN c.status = 'Descarregat' THEN co.name END, ', '), 1, 400) AS primeres_colles_descarregat,
    SUBSTR(STRING_AGG(DISTINCT CASE WHEN c.status = 'Carregat' THEN co.name END, ', '), 1, 400) AS primeres_colles_carregat,
    SUBSTR(STRING_AGG(DISTINCT CASE WHEN c.status = 'Intent desmuntat' OR c.status = 'Intent' THEN co.name END, ', '), 1, 400) AS primeres_colles_intentat,
    COALESCE(p.punts_descarregat, 0) AS punts_descarregat,
    COALESCE(p.punts_carregat, 0) AS punts_carregat
FROM castells c
JOIN event_colles ec ON c.event_colla_fk = ec.id
JOIN events e ON ec.event_fk = e.id
JOIN colles co ON ec.colla_fk = co.id
{score_join}
WHERE 1=1
{team_filter}
{construction_filter}
{year_filter}
{place_filter}
{event_filter}
GROUP BY c.castell_name, p.punts_descarregat, p.punts_carregat
LIMIT {limit}"#;

const CONTEST_RANKING_SKELETON: &str = r#"SELECT
    c.edition,
    c.title,
    c.date,
    c.location,
    c.colla_guanyadora,
    cr.position,
    cr.colla_name,
    cr.total_points,
    cr.jornada,
    cr.ronda_1_json AS primera_ronda,
    cr.ronda_2_json AS segona_ronda,
    cr.ronda_3_json AS tercera_ronda,
    cr.ronda_4_json AS quarta_ronda,
    cr.ronda_5_json AS cinquena_ronda,
    cr.ronda_6_json AS sisena_ronda,
    cr.ronda_7_json AS setena_ronda
FROM concurs c
JOIN concurs_rankings cr ON c.id = cr.concurs_fk
WHERE 1=1
{edition_filter}
{track_filter}
{team_filter}
{position_filter}
{year_filter}
{contest_construction_filter}
{contest_status_filter}
ORDER BY cr.position ASC
LIMIT {limit}"#;

const CONTEST_HISTORY_SKELETON: &str = r#"SELECT
    c.edition,
    c.title,
    c.date,
    c.location,
    c.colla_guanyadora,
    c.num_colles,
    c.castells_intentats,
    c.maxim_castell,
    c.espectadors,
    COUNT(cr.id) AS colles_participants,
    AVG(cr.total_points)::float8 AS avg_points,
    MAX(cr.total_points) AS max_points,
    MIN(cr.total_points) AS min_points
FROM concurs c
LEFT JOIN concurs_rankings cr ON c.id = cr.concurs_fk
WHERE 1=1
{edition_filter}
{place_filter}
{year_filter}
GROUP BY c.id, c.edition, c.title, c.date, c.location, c.colla_guanyadora, c.num_colles, c.castells_intentats, c.maxim_castell, c.espectadors
ORDER BY c.date DESC
LIMIT {limit}"#;

/// Template lookup for a non-custom kind.
pub fn template_for(kind: SqlQueryType) -> Option<QueryTemplate> {
    use ParamKind::*;
    let template = match kind {
        SqlQueryType::BestEvent => QueryTemplate {
            kind,
            skeleton: BEST_EVENT_SKELETON,
            required: &[],
            optional: &[Team, Year, Place, Event, Construction],
            default_limit: 5,
        },
        SqlQueryType::BestConstruction => QueryTemplate {
            kind,
            skeleton: BEST_CONSTRUCTION_SKELETON,
            required: &[],
            optional: &[Team, Year, Place, Event],
            default_limit: 5,
        },
        SqlQueryType::ConstructionHistory => QueryTemplate {
            kind,
            skeleton: CONSTRUCTION_HISTORY_SKELETON,
            required: &[],
            optional: &[Team, Construction, Year, Place],
            default_limit: 10,
        },
        SqlQueryType::LocationPerformances => QueryTemplate {
            kind,
            skeleton: LOCATION_PERFORMANCES_SKELETON,
            required: &[],
            optional: &[Team, Year, Place],
            default_limit: 5,
        },
        SqlQueryType::FirstConstruction => QueryTemplate {
            kind,
            skeleton: FIRST_CONSTRUCTION_SKELETON,
            required: &[Construction],
            optional: &[Team, Place, Event],
            default_limit: 3,
        },
        SqlQueryType::ConstructionStatistics => QueryTemplate {
            kind,
            skeleton: CONSTRUCTION_STATISTICS_SKELETON,
            required: &[Construction],
            optional: &[Team, Year, Place, Event],
            default_limit: 1,
        },
        SqlQueryType::YearSummary => QueryTemplate {
            kind,
            skeleton: YEAR_SUMMARY_SKELETON,
            required: &[Year],
            optional: &[Place, Team],
            default_limit: 10,
        },
        SqlQueryType::ContestRanking => QueryTemplate {
            kind,
            skeleton: CONTEST_RANKING_SKELETON,
            required: &[],
            optional: &[Edition, Track, Team, Position, Year, Construction],
            default_limit: 5,
        },
        SqlQueryType::ContestHistory => QueryTemplate {
            kind,
            skeleton: CONTEST_HISTORY_SKELETON,
            required: &[],
            optional: &[Edition, Place, Year],
            default_limit: 10,
        },
        SqlQueryType::Custom => return None,
    };
    Some(template)
}

// ---------------------------------------------------------------------------
// Fragment rendering
// ---------------------------------------------------------------------------

struct Binder {
    params: Vec<SqlParam>,
}

impl Binder {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// Render `$i, $j, ...` for an `IN` list.
    fn push_list<I: IntoIterator<Item = SqlParam>>(&mut self, values: I) -> String {
        values
            .into_iter()
            .map(|v| self.push(v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn eq_or_in(binder: &mut Binder, column: &str, values: &[String]) -> String {
    match values {
        [] => String::new(),
        [single] => {
            let ph = binder.push(SqlParam::Text(single.clone()));
            format!("AND {column} = {ph}")
        }
        many => {
            let list = binder.push_list(many.iter().map(|v| SqlParam::Text(v.clone())));
            format!("AND {column} IN ({list})")
        }
    }
}

fn like_or_in(binder: &mut Binder, column: &str, values: &[String]) -> String {
    match values {
        [] => String::new(),
        [single] => {
            let ph = binder.push(SqlParam::Text(single.clone()));
            format!("AND {column} LIKE '%' || {ph} || '%'")
        }
        many => {
            let list = binder.push_list(many.iter().map(|v| SqlParam::Text(v.clone())));
            format!("AND {column} IN ({list})")
        }
    }
}

fn int_eq_or_in(binder: &mut Binder, column: &str, values: &[i64]) -> String {
    match values {
        [] => String::new(),
        [single] => {
            let ph = binder.push(SqlParam::Int(*single));
            format!("AND {column} = {ph}")
        }
        many => {
            let list = binder.push_list(many.iter().map(|v| SqlParam::Int(*v)));
            format!("AND {column} IN ({list})")
        }
    }
}

/// Construction statuses attached to extracted castells, deduplicated.
fn statuses_of(entities: &Entities) -> Vec<CastellStatus> {
    let mut statuses: Vec<CastellStatus> = Vec::new();
    for castell in &entities.constructions {
        if let Some(status) = castell.status {
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }
    }
    statuses
}

/// Probe every round-JSON column of a contest ranking row for a bound
/// pattern fragment.
fn round_json_probe(binder: &mut Binder, pattern: String) -> String {
    const ROUND_COLUMNS: &[&str] = &[
        "cr.ronda_1_json",
        "cr.ronda_2_json",
        "cr.ronda_3_json",
        "cr.ronda_4_json",
        "cr.ronda_5_json",
        "cr.ronda_6_json",
        "cr.ronda_7_json",
        "cr.ronda_8_json",
        "cr.rondes_json",
    ];
    let ph = binder.push(SqlParam::Text(pattern));
    let probes: Vec<String> = ROUND_COLUMNS
        .iter()
        .map(|col| format!("{col} LIKE '%' || {ph} || '%'"))
        .collect();
    format!("({})", probes.join(" OR "))
}

fn render_fragment(
    hole: &str,
    template: &QueryTemplate,
    entities: &Entities,
    binder: &mut Binder,
) -> String {
    let contest = matches!(
        template.kind,
        SqlQueryType::ContestRanking | SqlQueryType::ContestHistory
    );

    match hole {
        "score_join" => SCORE_JOIN.to_owned(),
        "team_filter" => {
            let column = if contest { "cr.colla_name" } else { "co.name" };
            eq_or_in(binder, column, &entities.teams)
        }
        "construction_filter" => {
            let names: Vec<String> = entities
                .constructions
                .iter()
                .map(|c| code_to_name(&c.code).to_owned())
                .collect();
            eq_or_in(binder, "c.castell_name", &names)
        }
        "construction_having_filter" => {
            let conditions: Vec<String> = entities
                .constructions
                .iter()
                .map(|castell| {
                    let name = code_to_name(&castell.code);
                    match castell.status {
                        Some(status) => {
                            let pattern = format!("{name} ({status})");
                            let ph = binder.push(SqlParam::Text(pattern));
                            format!(
                                "STRING_AGG(castell_name || ' (' || status || ')', ', ') LIKE '%' || {ph} || '%'"
                            )
                        }
                        None => {
                            let ph = binder.push(SqlParam::Text(name.to_owned()));
                            format!("STRING_AGG(castell_name, ', ') LIKE '%' || {ph} || '%'")
                        }
                    }
                })
                .collect();
            match conditions.len() {
                0 => String::new(),
                1 => format!("AND {}", conditions[0]),
                _ => format!("AND ({})", conditions.join(" OR ")),
            }
        }
        "year_filter" => {
            let years: Vec<i64> = entities.years.iter().map(|y| i64::from(*y)).collect();
            if contest {
                int_eq_or_in(binder, "cr.\"any\"", &years)
            } else {
                int_eq_or_in(
                    binder,
                    "EXTRACT(YEAR FROM TO_DATE(e.date, 'DD/MM/YYYY'))::int",
                    &years,
                )
            }
        }
        "place_filter" => {
            let column = if contest { "c.location" } else { "e.city" };
            like_or_in(binder, column, &entities.places)
        }
        "event_filter" => like_or_in(binder, "e.name", &entities.events),
        "status_filter" => {
            let statuses: Vec<String> = statuses_of(entities)
                .into_iter()
                .map(|s| s.as_db_str().to_owned())
                .collect();
            eq_or_in(binder, "c.status", &statuses)
        }
        "edition_filter" => eq_or_in(binder, "c.edition", &entities.editions),
        "track_filter" => like_or_in(binder, "cr.jornada", &entities.tracks),
        "position_filter" => {
            let positions: Vec<i64> =
                entities.positions.iter().map(|p| i64::from(*p)).collect();
            int_eq_or_in(binder, "cr.position", &positions)
        }
        "contest_construction_filter" => {
            let conditions: Vec<String> = entities
                .constructions
                .iter()
                .map(|castell| {
                    round_json_probe(binder, format!("\"castell\": \"{}\"", castell.code))
                })
                .collect();
            match conditions.len() {
                0 => String::new(),
                _ => format!("AND ({})", conditions.join(" OR ")),
            }
        }
        "contest_status_filter" => {
            let conditions: Vec<String> = statuses_of(entities)
                .into_iter()
                .map(|status| {
                    round_json_probe(binder, format!("\"status\": \"{}\"", status.as_db_str()))
                })
                .collect();
            match conditions.len() {
                0 => String::new(),
                _ => format!("AND ({})", conditions.join(" OR ")),
            }
        }
        "limit" => binder.push(SqlParam::Int(template.default_limit)),
        other => {
            tracing::warn!(hole = other, "unknown template hole left empty");
            String::new()
        }
    }
}

/// Render a template against validated entities.
///
/// # Errors
///
/// [`SqlGenError::MissingRequired`] when a required entity kind is absent —
/// the sentinel that triggers the custom-generation fallback.
pub fn generate(kind: SqlQueryType, entities: &Entities) -> Result<SqlQuery, SqlGenError> {
    let template = template_for(kind)
        .ok_or(SqlGenError::MissingRequired("template"))?;

    for param in template.required {
        if !param.present_in(entities) {
            return Err(SqlGenError::MissingRequired(param.name()));
        }
    }

    let hole_re = Regex::new(r"\{([a-z_]+)\}")
        .map_err(|e| SqlGenError::Rejected(format!("bad hole pattern: {e}")))?;
    let mut binder = Binder::new();
    let mut sql = String::with_capacity(template.skeleton.len());
    let mut last_end = 0;

    for caps in hole_re.captures_iter(template.skeleton) {
        let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let hole = caps.get(1).map_or("", |m| m.as_str());
        sql.push_str(&template.skeleton[last_end..whole.0]);
        sql.push_str(&render_fragment(hole, &template, entities, &mut binder));
        last_end = whole.1;
    }
    sql.push_str(&template.skeleton[last_end..]);

    // Collapse the blank lines empty fragments leave behind.
    let sql = sql
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(SqlQuery {
        sql,
        params: binder.params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Castell;

    fn entities_with(f: impl FnOnce(&mut Entities)) -> Entities {
        let mut entities = Entities::default();
        f(&mut entities);
        entities
    }

    /// Every placeholder `$n` from 1..=params.len() must appear in the SQL.
    fn assert_placeholders_consistent(query: &SqlQuery) {
        for n in 1..=query.params.len() {
            assert!(
                query.sql.contains(&format!("${n}")),
                "missing placeholder ${n} in:\n{}",
                query.sql
            );
        }
        let next = format!("${}", query.params.len().saturating_add(1));
        assert!(
            !query.sql.contains(&next),
            "unbound placeholder {next} in:\n{}",
            query.sql
        );
    }

    #[test]
    fn test_every_template_is_a_single_select() {
        for kind in SqlQueryType::templated() {
            let entities = entities_with(|e| {
                e.teams.push("Castellers de Vilafranca".to_owned());
                e.constructions.push(Castell::new("3d9f"));
                e.years.push(2023);
            });
            let query = generate(*kind, &entities).expect("template should render");
            let upper = query.sql.trim_start().to_uppercase();
            assert!(
                upper.starts_with("SELECT") || upper.starts_with("WITH"),
                "{kind} does not start with SELECT/WITH"
            );
            assert_eq!(query.sql.matches(';').count(), 0, "{kind} has statement separators");
            assert_placeholders_consistent(&query);
        }
    }

    #[test]
    fn test_best_event_binds_filters_and_limit() {
        let entities = entities_with(|e| {
            e.teams.push("Castellers de Vilafranca".to_owned());
            e.years.push(2023);
        });
        let query = generate(SqlQueryType::BestEvent, &entities).expect("render");

        assert!(query.sql.contains("AND co.name = $1"));
        assert!(query
            .sql
            .contains("EXTRACT(YEAR FROM TO_DATE(e.date, 'DD/MM/YYYY'))::int = $2"));
        assert!(query.sql.contains("LIMIT $3"));
        assert_eq!(
            query.params,
            vec![
                SqlParam::Text("Castellers de Vilafranca".to_owned()),
                SqlParam::Int(2023),
                SqlParam::Int(5),
            ]
        );
        // The top-4 scoring rule and the low-value pillar exclusion.
        assert!(query.sql.contains("WHEN rn <= 4 THEN punts"));
        assert!(query.sql.contains("!= 'Pde4'"));
    }

    #[test]
    fn test_multi_value_filters_render_in_lists() {
        let entities = entities_with(|e| {
            e.teams.push("Castellers de Vilafranca".to_owned());
            e.teams.push("Minyons de Terrassa".to_owned());
            e.years.push(2022);
            e.years.push(2023);
        });
        let query = generate(SqlQueryType::BestEvent, &entities).expect("render");
        assert!(query.sql.contains("AND co.name IN ($1, $2)"));
        assert!(query.sql.contains("IN ($3, $4)"));
        assert_placeholders_consistent(&query);
    }

    #[test]
    fn test_best_event_having_filter_with_status() {
        let entities = entities_with(|e| {
            e.constructions.push(Castell::with_status(
                "3d9f",
                crate::types::CastellStatus::Completed,
            ));
        });
        let query = generate(SqlQueryType::BestEvent, &entities).expect("render");
        assert!(query.sql.contains("HAVING 1=1"));
        assert!(query
            .sql
            .contains("STRING_AGG(castell_name || ' (' || status || ')', ', ') LIKE"));
        // The bound pattern uses the display name and the stored status.
        assert!(query
            .params
            .contains(&SqlParam::Text("3de9f (Descarregat)".to_owned())));
    }

    #[test]
    fn test_first_construction_requires_castell() {
        let empty = Entities::default();
        assert!(matches!(
            generate(SqlQueryType::FirstConstruction, &empty),
            Err(SqlGenError::MissingRequired("construction"))
        ));

        let entities = entities_with(|e| e.constructions.push(Castell::new("3d10fm")));
        let query = generate(SqlQueryType::FirstConstruction, &entities).expect("render");
        assert!(query.sql.contains("AND c.castell_name = $1"));
        assert_eq!(
            query.params[0],
            SqlParam::Text("3de10fm".to_owned()),
            "filter must use the display-name column value"
        );
        assert!(query.sql.contains("ORDER BY TO_DATE(e.date, 'DD/MM/YYYY') ASC"));
        assert!(query.sql.trim_end().ends_with("LIMIT 1"));
    }

    #[test]
    fn test_year_summary_requires_year() {
        assert!(matches!(
            generate(SqlQueryType::YearSummary, &Entities::default()),
            Err(SqlGenError::MissingRequired("year"))
        ));

        let entities = entities_with(|e| e.years.push(2023));
        let query = generate(SqlQueryType::YearSummary, &entities).expect("render");
        assert!(query.sql.contains("castells_descarregats"));
        assert!(query.sql.contains("castells_intent_desmuntat"));
    }

    #[test]
    fn test_construction_statistics_shape() {
        let entities = entities_with(|e| e.constructions.push(Castell::new("3d10fm")));
        let query =
            generate(SqlQueryType::ConstructionStatistics, &entities).expect("render");
        assert!(query.sql.contains("cops_descarregat"));
        assert!(query.sql.contains("SUBSTR(STRING_AGG(DISTINCT"));
        assert!(query.sql.contains("1, 400"));
        assert!(query.sql.contains("primera_data_descarregat"));
        assert!(query.sql.contains("colles_intentat"));
    }

    #[test]
    fn test_contest_ranking_uses_contest_columns() {
        let entities = entities_with(|e| {
            e.teams.push("Colla Vella dels Xiquets de Valls".to_owned());
            e.years.push(2022);
            e.tracks.push("Jornada Torredembarra".to_owned());
            e.positions.push(1);
        });
        let query = generate(SqlQueryType::ContestRanking, &entities).expect("render");
        assert!(query.sql.contains("cr.jornada LIKE"));
        assert!(query.sql.contains("AND cr.colla_name = "));
        assert!(query.sql.contains("cr.\"any\" = "));
        assert!(query.sql.contains("cr.position = "));
        assert!(query.sql.contains("ORDER BY cr.position ASC"));
        assert_placeholders_consistent(&query);
    }

    #[test]
    fn test_contest_ranking_round_probe() {
        let entities = entities_with(|e| {
            e.constructions.push(Castell::with_status(
                "4d9af",
                crate::types::CastellStatus::Loaded,
            ));
        });
        let query = generate(SqlQueryType::ContestRanking, &entities).expect("render");
        assert!(query.sql.contains("cr.ronda_1_json LIKE"));
        assert!(query.sql.contains("cr.rondes_json LIKE"));
        assert!(query
            .params
            .contains(&SqlParam::Text("\"castell\": \"4d9af\"".to_owned())));
        assert!(query
            .params
            .contains(&SqlParam::Text("\"status\": \"Carregat\"".to_owned())));
    }

    #[test]
    fn test_contest_history_aggregates() {
        let entities = entities_with(|e| e.editions.push("XXIV".to_owned()));
        let query = generate(SqlQueryType::ContestHistory, &entities).expect("render");
        assert!(query.sql.contains("AND c.edition = $1"));
        assert!(query.sql.contains("AVG(cr.total_points)::float8"));
        assert!(query.sql.contains("colles_participants"));
    }

    #[test]
    fn test_no_entity_text_in_sql() {
        // The invariant behind parameter binding: entity strings never
        // appear verbatim in the SQL text.
        let entities = entities_with(|e| {
            e.teams.push("Colla d'O'Brien; DROP TABLE colles".to_owned());
            e.years.push(2023);
        });
        let query = generate(SqlQueryType::BestEvent, &entities).expect("render");
        assert!(!query.sql.contains("O'Brien"));
        assert!(!query.sql.contains("DROP TABLE"));
    }

    #[test]
    fn test_score_join_matches_three_code_columns() {
        let entities = entities_with(|e| e.years.push(2023));
        let query = generate(SqlQueryType::BestEvent, &entities).expect("render");
        assert!(query.sql.contains("p.castell_code_external"));
        assert!(query.sql.contains("p.castell_code_name"));
        assert!(query.sql.matches("c.castell_name = p.").count() >= 3);
    }
}
