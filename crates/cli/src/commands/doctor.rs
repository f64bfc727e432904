//! `llamart doctor`: Diagnose system health.

use super::Overrides;
use llamart_config::AppConfig;
use llamart_knowledge::KnowledgeBase;

pub async fn run(overrides: &Overrides) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Llamart Doctor: System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    if cfg!(feature = "local") {
        println!("  ✅ Local text engine compiled in");
    } else {
        println!("  ⚠️  Local text engine not compiled in (rebuild with --features local)");
        issues += 1;
    }

    let config_path = overrides.config_path();
    if !config_path.exists() {
        println!("  ⚠️  No config file; run `llamart onboard` (using defaults)");
        issues += 1;
    }

    let config = match overrides.load_config() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  {} issue(s) found. See above for details.", issues + 1);
            return Ok(());
        }
    };

    issues += check_model(&config);
    issues += check_knowledge(&config);

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn check_model(config: &AppConfig) -> usize {
    match config.model_selection() {
        Ok(selection) => {
            println!(
                "  ✅ Model {} routes to the {} backend",
                selection.model_path.display(),
                selection.kind
            );
            println!("  ✅ Tokenizer {}", selection.tokenizer_path.display());
            0
        }
        Err(e) => {
            println!("  ❌ Model selection: {e}");
            1
        }
    }
}

fn check_knowledge(config: &AppConfig) -> usize {
    let path = config.knowledge_path();
    match KnowledgeBase::load(&path, config.knowledge.delimiter) {
        Ok(base) if base.is_empty() => {
            println!("  ⚠️  Knowledge file {} has no entries", path.display());
            1
        }
        Ok(base) => {
            println!("  ✅ Knowledge: {} entries", base.len());
            0
        }
        Err(e) => {
            println!("  ❌ Knowledge: {e}");
            1
        }
    }
}
