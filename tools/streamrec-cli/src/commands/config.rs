//! Show or save the effective configuration.

use std::path::PathBuf;

use streamrec_common::config::AppConfig;

pub fn run(config: &AppConfig, write: bool, path: Option<PathBuf>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    if write {
        let saved = match path {
            Some(path) => {
                config.save_to(&path)?;
                path
            }
            None => config.save()?,
        };
        println!();
        println!("Configuration saved to: {}", saved.display());
    }

    Ok(())
}
