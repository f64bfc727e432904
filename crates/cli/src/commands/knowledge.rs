//! `llamart knowledge`: Show what a query retrieves.

use super::{Overrides, open_knowledge};
use llamart_core::event::EventBus;

pub async fn run(overrides: &Overrides, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = overrides.load_config()?;
    let knowledge = open_knowledge(&config, &EventBus::default());

    println!("📚 Knowledge: {} entries from {}", knowledge.len(), config.knowledge_path().display());
    println!("🔍 Query: \"{query}\"");
    println!();

    let hits = knowledge.retrieve(query);
    if hits.is_empty() {
        println!("  No entry title occurs in the query.");
        return Ok(());
    }
    for (i, entry) in hits.iter().enumerate() {
        println!("  {}. {}", i + 1, entry.title);
        println!("     {}", entry.description);
    }
    println!();
    println!("  {} entr{} retrieved", hits.len(), if hits.len() == 1 { "y" } else { "ies" });

    Ok(())
}
