//! Table projection for the UI side channel.
//!
//! Each query kind exposes a fixed ordered subset of its result columns
//! under user-facing Catalan titles. Rows are stringified; SQL NULLs render
//! as a `"-"` sentinel. The full (capped) row set goes to the UI; the
//! answering model sees a shorter slice elsewhere.

use crate::store::QueryOutput;
use crate::types::{SqlQueryType, TableData};

/// Sentinel shown for missing cells.
const EMPTY_CELL: &str = "-";

/// Raw result columns to display per kind, in display order.
fn columns_for(kind: SqlQueryType) -> Option<&'static [&'static str]> {
    match kind {
        SqlQueryType::BestEvent => Some(&[
            "event_name",
            "event_date",
            "colla_name",
            "event_place",
            "event_city",
            "castells_fets",
        ]),
        SqlQueryType::BestConstruction => Some(&[
            "castell_name",
            "event_name",
            "date",
            "colla_name",
            "city",
            "status",
        ]),
        SqlQueryType::ConstructionHistory => Some(&[
            "castell_name",
            "status",
            "count_occurrences",
            "colla_name",
            "first_date",
            "last_date",
            "cities",
        ]),
        SqlQueryType::LocationPerformances => Some(&[
            "year",
            "event_name",
            "date",
            "city",
            "colla_name",
            "castells_fets",
        ]),
        SqlQueryType::FirstConstruction => Some(&[
            "castell_name",
            "status",
            "year",
            "event_name",
            "date",
            "colla_name",
            "city",
        ]),
        SqlQueryType::ConstructionStatistics => Some(&[
            "castell_name",
            "cops_descarregat",
            "cops_carregat",
            "cops_intent_desmuntat",
            "cops_intent",
            "primera_data_descarregat",
            "primera_data_carregat",
            "colles_descarregat",
            "colles_carregat",
            "colles_intentat",
            "primeres_colles_descarregat",
            "primeres_colles_carregat",
            "primeres_colles_intentat",
        ]),
        SqlQueryType::YearSummary => Some(&[
            "colla_name",
            "num_actuacions",
            "num_castells",
            "castells_descarregats",
            "castells_carregats",
            "castells_intent_desmuntat",
            "castells_intent",
        ]),
        SqlQueryType::ContestRanking => Some(&[
            "colla_name",
            "position",
            "total_points",
            "jornada",
            "primera_ronda",
            "segona_ronda",
            "tercera_ronda",
            "quarta_ronda",
            "cinquena_ronda",
        ]),
        SqlQueryType::ContestHistory => Some(&[
            "edition",
            "title",
            "date",
            "location",
            "colla_guanyadora",
            "num_colles",
            "colles_participants",
            "maxim_castell",
        ]),
        // Custom queries show whatever came back.
        SqlQueryType::Custom => None,
    }
}

/// Display title for a raw column name; unknown names get a spaced,
/// capitalized fallback.
fn display_name(column: &str) -> String {
    let known = match column {
        "event_name" => "Diada",
        "event_date" | "date" => "Data",
        "colla_name" => "Colla",
        "event_city" | "city" => "Ciutat",
        "event_place" | "place" => "Plaça",
        "castells_fets" => "Castells",
        "castell_name" => "Castell",
        "status" => "Estat",
        "count_occurrences" => "Vegades",
        "first_date" => "Primera data",
        "last_date" => "Última data",
        "cities" => "Ciutats",
        "year" => "Any",
        "num_castells" => "Castells fets",
        "num_actuacions" => "Actuacions",
        "castells_descarregats" => "Descarregats",
        "castells_carregats" => "Carregats",
        "castells_intent_desmuntat" => "Intents desmuntats",
        "castells_intent" => "Intents",
        "cops_descarregat" => "Cops descarregat",
        "cops_carregat" => "Cops carregat",
        "cops_intent_desmuntat" => "Intents desmuntats",
        "cops_intent" => "Intents",
        "primera_data_descarregat" => "Primer descarregat",
        "primera_data_carregat" => "Primer carregat",
        "colles_descarregat" => "Colles (descarregat)",
        "colles_carregat" => "Colles (carregat)",
        "colles_intentat" => "Colles (intent)",
        "primeres_colles_descarregat" => "Qui l'ha descarregat",
        "primeres_colles_carregat" => "Qui l'ha carregat",
        "primeres_colles_intentat" => "Qui l'ha intentat",
        "position" => "Posició",
        "total_points" => "Punts totals",
        "jornada" => "Jornada",
        "primera_ronda" => "Ronda 1",
        "segona_ronda" => "Ronda 2",
        "tercera_ronda" => "Ronda 3",
        "quarta_ronda" => "Ronda 4",
        "cinquena_ronda" => "Ronda 5",
        "edition" => "Edició",
        "title" => "Concurs",
        "location" => "Localització",
        "colla_guanyadora" => "Colla guanyadora",
        "num_colles" => "Colles",
        "colles_participants" => "Participants",
        "maxim_castell" => "Màxim castell",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_owned();
    }

    let spaced = column.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => {
            let mut name: String = first.to_uppercase().collect();
            name.push_str(chars.as_str());
            name
        }
        None => spaced,
    }
}

/// Table heading per kind.
fn title_for(kind: SqlQueryType) -> &'static str {
    match kind {
        SqlQueryType::BestEvent => "Millors diades",
        SqlQueryType::BestConstruction => "Millors castells",
        SqlQueryType::ConstructionHistory => "Història del castell",
        SqlQueryType::LocationPerformances => "Millors actuacions",
        SqlQueryType::FirstConstruction => "Primer castell",
        SqlQueryType::ConstructionStatistics => "Estadístiques del castell",
        SqlQueryType::YearSummary => "Resum de la temporada",
        SqlQueryType::ContestRanking => "Classificació del concurs",
        SqlQueryType::ContestHistory => "Història del concurs",
        SqlQueryType::Custom => "Resultats",
    }
}

/// Project query output into the UI table payload.
///
/// Returns `None` for empty output. Only the kind's configured columns (in
/// their configured order, skipping any the query did not return) are
/// included, up to `row_limit` rows.
pub fn project(kind: SqlQueryType, output: &QueryOutput, row_limit: usize) -> Option<TableData> {
    if output.is_empty() {
        return None;
    }

    let selected: Vec<usize> = match columns_for(kind) {
        Some(wanted) => wanted
            .iter()
            .filter_map(|name| output.columns.iter().position(|c| c == name))
            .collect(),
        None => (0..output.columns.len()).collect(),
    };
    if selected.is_empty() {
        return None;
    }

    let columns: Vec<String> = selected
        .iter()
        .map(|idx| display_name(&output.columns[*idx]))
        .collect();

    let rows: Vec<Vec<String>> = output
        .rows
        .iter()
        .take(row_limit)
        .map(|row| {
            selected
                .iter()
                .map(|idx| {
                    row.get(*idx)
                        .and_then(|cell| cell.clone())
                        .unwrap_or_else(|| EMPTY_CELL.to_owned())
                })
                .collect()
        })
        .collect();

    Some(TableData {
        title: title_for(kind).to_owned(),
        columns,
        rows,
    })
}
