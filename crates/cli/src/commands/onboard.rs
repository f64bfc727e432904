//! `llamart onboard`: First-time setup.

use super::Overrides;
use llamart_config::AppConfig;
use std::path::Path;

const EXAMPLE_KNOWLEDGE: &str = concat!(
    "Water Lilies,Claude Monet's cycle of eight murals painted between 1914 and 1926, ",
    "installed in two oval rooms of the Musée de l'Orangerie in 1927.\n",
    "Young Girls at the Piano,Pierre-Auguste Renoir, 1892. Two girls reading a score ",
    "at an upright piano.\n",
    "The Wedding Procession,Henri Rousseau, around 1905. A wedding party posed in front ",
    "of a forest.\n",
);

pub async fn run(overrides: &Overrides) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = overrides.config_path();
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_dir);

    println!("🎨 Llamart: First-Time Setup");
    println!("=============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load_from(&config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    let knowledge_path = config.knowledge_path();
    if knowledge_path.exists() {
        println!("  Knowledge file exists: {}", knowledge_path.display());
    } else {
        if let Some(parent) = knowledge_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&knowledge_path, EXAMPLE_KNOWLEDGE)?;
        println!("✅ Created example knowledge file: {}", knowledge_path.display());
    }

    println!("\n📝 Next steps:");
    println!("   1. Set model_path and tokenizer_path in {}", config_path.display());
    println!("   2. Add one `title,description` line per painting to the knowledge file");
    println!("   3. Run: llamart chat\n");

    Ok(())
}
