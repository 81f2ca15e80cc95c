//! Check the media engine installation.

use streamrec_common::config::AppConfig;
use streamrec_media_engine::pipeline::{check_elements, engine_version};
use streamrec_media_engine::GstMediaEngine;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("streamrec System Check");
    println!("{}", "=".repeat(50));

    // Plugin directory
    let plugin_dir = match config.engine.resolve_plugin_dir() {
        Ok(dir) => dir,
        Err(e) => {
            println!("[FAIL] {e}");
            return Ok(());
        }
    };
    match &plugin_dir {
        Some(dir) => println!("[OK] Plugin directory: {}", dir.display()),
        None => println!("[OK] Plugin directory: system installation"),
    }

    // Engine
    if let Err(e) = GstMediaEngine::new(plugin_dir.as_deref()) {
        println!("[FAIL] {e}");
        return Ok(());
    }
    println!("[OK] Engine: {}", engine_version()?);

    // Elements
    println!();
    let elements = check_elements()?;
    for (name, available) in &elements {
        if *available {
            println!("[OK]   {name}");
        } else {
            println!("[MISS] {name}");
        }
    }

    println!();
    if elements.iter().all(|(_, available)| *available) {
        println!("All required elements are available. streamrec is ready.");
    } else {
        println!("Some required elements are missing. Install the matching GStreamer plugins.");
    }

    Ok(())
}
