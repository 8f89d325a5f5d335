//! Xiquet — a question-answering agent for the casteller knowledge base.
//!
//! Free-form Catalan questions are routed to the most appropriate strategy
//! (direct reply, semantic retrieval, templated SQL, or both combined),
//! executed, and answered as prose with an optional structured table for
//! the UI.

pub mod agent;
pub mod answer;
pub mod config;
pub mod extract;
pub mod logging;
pub mod providers;
pub mod rag;
pub mod router;
pub mod sqlgen;
pub mod store;
pub mod types;
