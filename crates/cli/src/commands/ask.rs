//! `llamart ask`: Single request mode.

use super::{Overrides, build_session, initial_selection, listen_for_interrupts, stream_to_stdout};
use llamart_agent::{GenerationOutcome, GenerationRequest};
use llamart_core::event::EventBus;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run(
    overrides: &Overrides,
    message: String,
    image: Option<PathBuf>,
    scripted: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = overrides.load_config()?;
    let selection = initial_selection(&config, scripted.is_some())
        .map_err(|e| format!("{e}. Set --model and --tokenizer or edit the config."))?;

    let session = Arc::new(build_session(
        &config,
        scripted.as_deref(),
        Arc::new(EventBus::default()),
    ));
    session.select_model(selection);

    let mut request = GenerationRequest::new(message);
    if let Some(path) = image {
        let img = image::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        request = request.with_image(img);
    }

    // Only one answer runs here, so an idle Ctrl+C has nothing to quit.
    let _quit = listen_for_interrupts(session.clone());
    let handle = session.start(request).await?;
    match stream_to_stdout(handle).await {
        GenerationOutcome::Failed { code, .. } => Err(format!("generation failed ({code})").into()),
        _ => Ok(()),
    }
}
