//! Final prose synthesis: per-strategy prompt triplets and the response
//! sanitizer.
//!
//! Every strategy gets a distinct `{system, developer, user}` triplet — a
//! domain-expert persona, strict Catalan formatting prohibitions, and the
//! question plus its retrieved context. The sanitizer strips any table a
//! model emits despite the rules.

use regex::Regex;

use crate::types::SqlQueryType;

/// A system/developer/user prompt set for one answering call.
#[derive(Debug, Clone)]
pub struct PromptTriplet {
    /// Persona message.
    pub system: String,
    /// Strict formatting rules; absent for strategies without them.
    pub developer: Option<String>,
    /// Question and data.
    pub user: String,
}

/// Shared answering persona.
const ANSWER_SYSTEM: &str = "Ets un expert casteller amb criteri tècnic i rigor històric.\nSempre respons exclusivament en català.\nSegueixes estrictament les instruccions de format i sortida.";

/// Shared formatting prohibitions, with a per-strategy paragraph hint.
fn answer_developer(extra: &str) -> String {
    format!(
        "INSTRUCCIONS ESTRICTES (OBLIGATÒRIES):\n\n\
         PROHIBIT:\n\
         - Afegir taules\n\
         - Afegir llistes amb guions o punts\n\
         - Donar opinions o valoracions personals\n\n\
         FORMAT DE SORTIDA:\n\
         - Markdown, text narratiu (paràgrafs) (NO TAULES)\n\
         - Únic ús de **negreta** per destacar fets rellevants (màxim 3-4 elements)\n\n\
         {extra}"
    )
}

/// Per-kind answering instructions, shown in the user message next to the
/// query results.
fn sql_instructions(kind: SqlQueryType) -> &'static str {
    match kind {
        SqlQueryType::BestEvent => "Instruccions específiques:\n\
            - Respon amb un paràgraf amb la diada, el lloc, la data i els castells realitzats (amb el seu estat), sense incloure els Pde4/Pde5.\n\
            - No afegeixis cap 'Nota' al final ni informació irrellevant.\n\
            - No indiquis el nombre total de castells realitzats.\n\
            - No afegeixis informació dels punts obtinguts dels castells.",
        SqlQueryType::BestConstruction => "Instruccions específiques:\n\
            - Identifica el millor castell (o els millors) segons la pregunta; estan ordenats per dificultat i punts.\n\
            - Proporciona tot el context: data exacta, lloc, diada i estat del castell.\n\
            - Si es parla de castell aconseguit, vol dir descarregat. Un intent o intent desmuntat vol dir que s'ha provat però no s'ha aconseguit.",
        SqlQueryType::ConstructionHistory => "Instruccions específiques:\n\
            - Resumeix quantes vegades s'ha fet aquest castell i en quins estats.\n\
            - Proporciona estadístiques clares: nombre total d'ocasions, descarregat vs carregat, primera i última data, ciutats.\n\
            - Si hi ha múltiples colles, organitza la informació per colla.",
        SqlQueryType::LocationPerformances => "Instruccions específiques:\n\
            - Identifica l'any o el lloc de la millor actuació basant-te en els punts totals.\n\
            - Proporciona el context que tinguis segons la pregunta: any, lloc, nom de la diada i estat de cada castell.",
        SqlQueryType::FirstConstruction => "Instruccions específiques:\n\
            - Identifica la primera vegada que es va aconseguir aquest castell.\n\
            - Proporciona el context rellevant: data exacta, lloc, diada i estat del castell (Descarregat/Carregat).",
        SqlQueryType::ConstructionStatistics => "Instruccions específiques:\n\
            - Resumeix les estadístiques completes del castell: cops descarregat vs carregat, primeres dates, nombre de colles que l'han aconseguit i quines.\n\
            - Destaca fets rellevants com la primera colla que el va aconseguir.",
        SqlQueryType::YearSummary => "Instruccions específiques:\n\
            - Resumeix l'activitat castellera de l'any: actuacions per colla, castells fets, descarregats vs carregats, i la classificació per punts.\n\
            - Si la pregunta es refereix a una colla o lloc concret, centra't en aquesta colla o lloc.",
        SqlQueryType::ContestRanking => "Instruccions específiques:\n\
            - Respon la pregunta sobre el concurs amb les dades proporcionades.\n\
            - Si hi ha dades de rondes, inclou els castells fets amb el seu estat; ignora rondes sense informació.",
        SqlQueryType::ContestHistory => "Instruccions específiques:\n\
            - Proporciona estadístiques completes referents a la pregunta sobre la història dels concursos.",
        SqlQueryType::Custom => "Instruccions específiques:\n\
            - Utilitza la informació de la consulta per respondre directament la pregunta.\n\
            - Quan parles de castells: 'Descarregat' = aconseguit del tot; 'Carregat' = coronat però no descarregat; 'Intent desmuntat' = no aconseguit. Especifica sempre l'estat.\n\
            - Sigues específic amb dates, llocs, castells i colles.\n\
            - No mencionis els punts o puntuacions a menys que la pregunta ho demani.",
    }
}

/// Paragraph-count hint per strategy.
fn paragraph_hint(kind: SqlQueryType) -> &'static str {
    match kind {
        SqlQueryType::ConstructionStatistics | SqlQueryType::YearSummary => {
            "Respon en 2-3 paràgrafs segons la complexitat de la pregunta."
        }
        _ => "Respon en 1-2 paràgrafs segons la complexitat de la pregunta.",
    }
}

/// Prompt triplet for the SQL path.
pub fn sql_summary_prompt(kind: SqlQueryType, question: &str, table: &str) -> PromptTriplet {
    let user = format!(
        "Pregunta:\n{question}\n\nResultats obtinguts de la base de dades:\n{table}\n\n{}",
        sql_instructions(kind)
    );
    PromptTriplet {
        system: ANSWER_SYSTEM.to_owned(),
        developer: Some(answer_developer(paragraph_hint(kind))),
        user,
    }
}

/// Prompt triplet for the RAG path.
pub fn rag_prompt(question: &str, context: &str) -> PromptTriplet {
    let developer = answer_developer(
        "SOBRE LA INFORMACIÓ PROPORCIONADA:\n\
         - Utilitza la informació proporcionada si és rellevant; si no, respon amb el teu propi coneixement casteller.\n\
         - Si no tens informació suficient, digues-ho honestament i no inventis dades específiques.\n\n\
         Respon en 1-3 paràgrafs segons la complexitat de la pregunta.",
    );
    let user = format!(
        "Pregunta:\n{question}\n\nInformació trobada als documents:\n{context}\n\nRespon la pregunta de forma breu i directa. Si la informació dels documents no és rellevant, utilitza el teu coneixement casteller."
    );
    PromptTriplet {
        system: ANSWER_SYSTEM.to_owned(),
        developer: Some(developer),
        user,
    }
}

/// Prompt triplet for the hybrid path; SQL context precedes RAG context.
pub fn hybrid_prompt(question: &str, sql_context: &str, rag_context: &str) -> PromptTriplet {
    let developer = answer_developer(
        "CONTEXT ESPECÍFIC:\n\
         - Combina la informació de les dues fonts (base de dades i documents).\n\
         - Prioritza les dades de la base de dades per informació específica (dates, estadístiques).\n\
         - Utilitza els documents per context històric o explicacions.\n\
         - No repeteixis dades literals ni mencionis puntuacions numèriques.\n\
         - Respon en 1-2 paràgrafs màxim.",
    );

    let mut user = format!("Pregunta:\n{question}\n");
    if !sql_context.is_empty() {
        user.push_str(&format!(
            "\n### Dades estructurades de la base de dades:\n{sql_context}\n"
        ));
    }
    if !rag_context.is_empty() {
        user.push_str(&format!(
            "\n### Informació contextual dels documents:\n{rag_context}\n"
        ));
    }
    user.push_str("\nRespon de forma breu i directa combinant ambdues fonts.");

    PromptTriplet {
        system: ANSWER_SYSTEM.to_owned(),
        developer: Some(developer),
        user,
    }
}

/// Strip tables and excess whitespace from a model answer.
///
/// Defense against models that ignore the no-tables instruction: any line
/// with two or more pipes goes, as do markdown separator rows. Space runs
/// collapse, paragraph breaks survive, and dangling space before `.`/`,`
/// is removed.
pub fn sanitize_response(response: &str) -> String {
    if response.is_empty() {
        return String::new();
    }

    let separator = Regex::new(r"^[\s|:\-]+$").ok();
    let kept: Vec<&str> = response
        .lines()
        .filter(|line| {
            let pipes = line.matches('|').count();
            if pipes >= 2 {
                return false;
            }
            if line.contains('|') {
                if let Some(re) = &separator {
                    if re.is_match(line) {
                        return false;
                    }
                }
            }
            true
        })
        .collect();

    let mut result = kept.join("\n");
    if let Ok(re) = Regex::new(r"\n{3,}") {
        result = re.replace_all(&result, "\n\n").into_owned();
    }
    if let Ok(re) = Regex::new(r"[ \t]{2,}") {
        result = re.replace_all(&result, " ").into_owned();
    }
    if let Ok(re) = Regex::new(r"\s+\.") {
        result = re.replace_all(&result, ".").into_owned();
    }
    if let Ok(re) = Regex::new(r"\s+,") {
        result = re.replace_all(&result, ",").into_owned();
    }
    result.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_prompt_carries_question_and_table() {
        let triplet = sql_summary_prompt(
            SqlQueryType::BestEvent,
            "Quina va ser la millor diada?",
            "colla_name | total_punts\nCastellers de Vilafranca | 9875",
        );
        assert!(triplet.system.contains("expert casteller"));
        let developer = triplet.developer.expect("developer rules present");
        assert!(developer.contains("PROHIBIT"));
        assert!(developer.contains("NO TAULES"));
        assert!(triplet.user.contains("Quina va ser la millor diada?"));
        assert!(triplet.user.contains("9875"));
        assert!(triplet.user.contains("Pde4"));
    }

    #[test]
    fn test_each_kind_has_distinct_instructions() {
        let kinds = [
            SqlQueryType::BestEvent,
            SqlQueryType::BestConstruction,
            SqlQueryType::ConstructionHistory,
            SqlQueryType::FirstConstruction,
            SqlQueryType::ConstructionStatistics,
            SqlQueryType::YearSummary,
            SqlQueryType::ContestRanking,
            SqlQueryType::ContestHistory,
            SqlQueryType::Custom,
        ];
        for window in kinds.windows(2) {
            assert_ne!(
                sql_instructions(window[0]),
                sql_instructions(window[1]),
                "{} and {} share instructions",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_hybrid_prompt_orders_sql_before_rag() {
        let triplet = hybrid_prompt("pregunta", "SQL DATA", "RAG DOCS");
        let sql_at = triplet.user.find("SQL DATA").expect("sql context present");
        let rag_at = triplet.user.find("RAG DOCS").expect("rag context present");
        assert!(sql_at < rag_at);
    }

    #[test]
    fn test_hybrid_prompt_omits_empty_sections() {
        let triplet = hybrid_prompt("pregunta", "", "RAG DOCS");
        assert!(!triplet.user.contains("Dades estructurades"));
        assert!(triplet.user.contains("RAG DOCS"));
    }

    #[test]
    fn test_sanitize_strips_table_rows() {
        let answer = "El millor castell va ser el **3d10fm**.\n\n| Colla | Castell |\n|---|---|\n| Vilafranca | 3d10fm |\n\nVa passar l'any 2015.";
        let sanitized = sanitize_response(answer);
        assert!(!sanitized.contains('|'));
        assert!(sanitized.contains("3d10fm"));
        assert!(sanitized.contains("2015"));
    }

    #[test]
    fn test_sanitize_no_line_with_two_pipes_survives() {
        let answer = "a | b | c\nnormal line\nx|y\n|----|";
        let sanitized = sanitize_response(answer);
        for line in sanitized.lines() {
            assert!(line.matches('|').count() < 2);
        }
        assert!(sanitized.contains("normal line"));
    }

    #[test]
    fn test_sanitize_whitespace() {
        let answer = "Una frase  amb   espais .\n\n\n\nI una altra ,  aquí.";
        let sanitized = sanitize_response(answer);
        assert_eq!(sanitized, "Una frase amb espais.\n\nI una altra, aquí.");
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_response(""), "");
    }
}
