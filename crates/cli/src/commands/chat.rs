//! `llamart chat`: Interactive conversation.

use super::{Overrides, build_session, initial_selection, listen_for_interrupts, stream_to_stdout};
use image::DynamicImage;
use llamart_agent::{GenerationRequest, GenerationSession, SelectionOutcome};
use llamart_core::backend::ModelSelection;
use llamart_core::event::EventBus;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Exit,
    History,
    Image(PathBuf),
    Model(PathBuf),
    Tokenizer(PathBuf),
    Message(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
        return Input::Exit;
    }
    if line == "/history" {
        return Input::History;
    }
    let command = |prefix: &str| {
        line.strip_prefix(prefix)
            .map(str::trim)
            .filter(|rest| !rest.is_empty())
            .map(PathBuf::from)
    };
    if let Some(path) = command("/image ") {
        return Input::Image(path);
    }
    if let Some(path) = command("/model ") {
        return Input::Model(path);
    }
    if let Some(path) = command("/tokenizer ") {
        return Input::Tokenizer(path);
    }
    Input::Message(line.to_string())
}

pub async fn run(
    overrides: &Overrides,
    scripted: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = overrides.load_config()?;
    let events = Arc::new(EventBus::default());
    let session = Arc::new(build_session(&config, scripted.as_deref(), events));

    let mut selection = match initial_selection(&config, scripted.is_some()) {
        Ok(selection) => {
            session.select_model(selection.clone());
            Some(selection)
        }
        Err(e) => {
            eprintln!("  [Model] {e}");
            eprintln!("  Choose one with /model <path> and /tokenizer <path>.");
            None
        }
    };

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         Llamart · Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    match &selection {
        Some(s) => {
            println!("  Model:     {} ({})", s.model_path.display(), s.kind);
            println!("  Tokenizer: {}", s.tokenizer_path.display());
        }
        None => println!("  Model:     (none)"),
    }
    println!("  Knowledge: {} entries", session.knowledge().len());
    if scripted.is_some() {
        println!("  Backend:   scripted");
    }
    println!();
    println!("  Type your message and press Enter. Ctrl+C stops a running answer or quits.");
    println!("  /image <path>, /model <path>, /tokenizer <path>, /history, exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attached: Option<DynamicImage> = None;
    let quit = listen_for_interrupts(session.clone());

    prompt_marker()?;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        match parse_input(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::History => {
                let transcript = session.memory().transcript().await;
                if transcript.is_empty() {
                    println!("  (no history yet)");
                } else {
                    println!("{transcript}");
                }
            }
            Input::Image(path) => match image::open(&path) {
                Ok(img) => {
                    println!("  Attached {} ({}x{})", path.display(), img.width(), img.height());
                    attached = Some(img);
                }
                Err(e) => eprintln!("  [Image] {}: {e}", path.display()),
            },
            Input::Model(path) => {
                let tokenizer = selection
                    .as_ref()
                    .map(|s| s.tokenizer_path.clone())
                    .unwrap_or_default();
                selection = switch_model(&session, path, tokenizer, scripted.is_some())
                    .or(selection);
            }
            Input::Tokenizer(path) => {
                let model = selection
                    .as_ref()
                    .map(|s| s.model_path.clone())
                    .unwrap_or_default();
                selection = switch_model(&session, model, path, scripted.is_some())
                    .or(selection);
            }
            Input::Message(text) => {
                let mut request = GenerationRequest::new(text);
                if let Some(img) = attached.take() {
                    request = request.with_image(img);
                }
                match session.start(request).await {
                    Ok(handle) => {
                        println!();
                        print!("  Assistant > ");
                        std::io::stdout().flush()?;
                        stream_to_stdout(handle).await;
                        println!();
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
        }
        prompt_marker()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn switch_model(
    session: &GenerationSession,
    model: PathBuf,
    tokenizer: PathBuf,
    scripted: bool,
) -> Option<ModelSelection> {
    let selection = if scripted {
        Ok(ModelSelection::new(model, tokenizer))
    } else {
        ModelSelection::from_paths(model, tokenizer)
    };
    match selection {
        Ok(selection) => {
            let outcome = session.select_model(selection.clone());
            let when = match outcome {
                SelectionOutcome::Applied => "now",
                SelectionOutcome::Deferred => "after the current answer",
            };
            println!(
                "  Using {} ({}) {when}",
                selection.model_path.display(),
                selection.kind
            );
            Some(selection)
        }
        Err(e) => {
            eprintln!("  [Model] {e}");
            None
        }
    }
}

fn prompt_marker() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
