//! Xiquet CLI — build the pipeline and answer questions from the terminal.
//!
//! The production chat surface lives in a separate service; this binary
//! wires the same core and drives it interactively (`repl`, the default)
//! or for a single question (`ask`).

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use xiquet::agent::Agent;
use xiquet::config::XiquetConfig;
use xiquet::providers::registry::{LlmClient, ProviderRegistry};
use xiquet::rag::{OpenAiEmbeddings, Retriever};
use xiquet::router::Router;
use xiquet::sqlgen::SqlGenerator;
use xiquet::store::vocab::VocabCache;
use xiquet::store::Database;
use xiquet::types::{QuestionRequest, QuestionResponse};

#[derive(Parser)]
#[command(name = "xiquet", about = "Casteller knowledge agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question and exit.
    Ask {
        /// The question text.
        question: String,
    },
    /// Interactive question loop (default).
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; environment variables may come from anywhere.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = XiquetConfig::load().context("failed to load configuration")?;

    let _guard = match &cli.command {
        Some(Command::Ask { .. }) => {
            xiquet::logging::init_console(&config.logging.log_level);
            None
        }
        _ => Some(
            xiquet::logging::init_with_file(
                Path::new(&config.logging.logs_dir),
                &config.logging.log_level,
            )
            .context("failed to initialise logging")?,
        ),
    };

    let agent = build_agent(config).await?;

    match cli.command {
        Some(Command::Ask { question }) => {
            let response = agent.process_question(&QuestionRequest::new(question)).await;
            print_response(&response);
        }
        _ => repl(&agent).await?,
    }

    Ok(())
}

async fn build_agent(config: XiquetConfig) -> Result<Agent> {
    let registry = Arc::new(ProviderRegistry::from_env(|key| std::env::var(key).ok()));

    // The configured models must resolve now; a missing vendor key should
    // fail startup, not the first question.
    registry
        .check_spec(&config.models.router_model)
        .with_context(|| format!("router model '{}'", config.models.router_model))?;
    registry
        .check_spec(&config.models.answer_model)
        .with_context(|| format!("answer model '{}'", config.models.answer_model))?;

    let llm = LlmClient::new(Arc::clone(&registry), config.provider);

    let db = Database::connect(&config.database).context("failed to build connection pool")?;

    let vocab = Arc::new(VocabCache::new());

    let openai_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if openai_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; retrieval will be unavailable");
    }
    let embeddings = Arc::new(OpenAiEmbeddings::new(
        openai_key,
        config.rag.embed_model.clone(),
        config.rag.embed_dim,
    ));

    let router = Router::new(
        llm.clone(),
        Arc::clone(&vocab),
        config.models.clone(),
        config.limits,
        config.router,
    );
    let sqlgen = SqlGenerator::new(llm.clone(), config.models.answer_model.clone());
    let retriever = Retriever::new(db.clone(), embeddings, config.rag.clone());

    let agent = Agent::new(router, sqlgen, db, retriever, llm, vocab, config);

    match agent.prewarm().await {
        Ok(()) => info!("vocabulary caches prewarmed"),
        Err(e) => warn!(error = %e, "vocabulary prewarm failed; first query pays the load"),
    }

    Ok(agent)
}

async fn repl(agent: &Agent) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("Xiquet — pregunta'm sobre el món casteller ('sortir' per acabar)");
    loop {
        print!("> ");
        stdout.flush().context("flush prompt")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("read question")? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("sortir") {
            break;
        }

        let response = agent
            .process_question(&QuestionRequest::new(question.to_owned()))
            .await;
        print_response(&response);
        println!("{}", "-".repeat(50));
    }

    Ok(())
}

fn print_response(response: &QuestionResponse) {
    println!("\n{}\n", response.response);
    if let Some(table) = &response.table_data {
        println!("[{}]", table.title);
        println!("{}", table.columns.join(" | "));
        for row in &table.rows {
            println!("{}", row.join(" | "));
        }
        println!();
    }
    println!(
        "(ruta: {}, {} ms)",
        response.route_used, response.response_time_ms
    );
}
