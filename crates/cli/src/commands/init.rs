//! `chartwise init` — Write a default config file.

use chartwise_config::AppConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;

    println!("✅ Wrote {}", path.display());
    println!("   Set CHARTWISE_API_KEY (or OPENAI_API_KEY) before running `chartwise ask`.");
    Ok(())
}
