//! `llamart prompt`: Print the assembled prompt for a message.

use super::{Overrides, open_knowledge};
use llamart_agent::PromptAssembler;
use llamart_core::backend::BackendKind;
use llamart_core::event::EventBus;

pub async fn run(overrides: &Overrides, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = overrides.load_config()?;
    let knowledge = open_knowledge(&config, &EventBus::default());
    let assembler = PromptAssembler::from_config(&config.prompt);
    let kind = BackendKind::from_model_path(&config.model.model_path);

    // A fresh conversation has no transcript.
    let retrieved = knowledge.retrieve(&PromptAssembler::retrieval_query(text, ""));
    let prompt = PromptAssembler::for_backend(&assembler.build(text, &retrieved, ""), kind);

    eprintln!("  Backend: {kind}, {} knowledge hit(s)", retrieved.len());
    println!("{prompt}");
    Ok(())
}
