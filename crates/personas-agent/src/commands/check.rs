//! Configuration and connectivity check.

use crate::config::mask_key;
use anyhow::{Result, bail};
use colored::Colorize;
use personas_core::AgentConfig;
use personas_core::generation::{GeminiClient, Generator, OpenAiImageClient, TextRequest};
use personas_core::surface::CanvusClient;
use std::path::Path;

pub async fn execute(config: &AgentConfig, config_path: &Path) -> Result<()> {
    println!("{}", "personas-agent check".cyan().bold());
    println!("{}", "─".repeat(50));
    println!();

    let mut issues = Vec::new();

    print!("  Config file: ");
    if config_path.exists() {
        println!("{}", format!("✓ {}", config_path.display()).green());
    } else {
        println!("{}", "○ not found (using environment and defaults)".yellow());
    }

    print!("  Configuration: ");
    match config.validate() {
        Ok(()) => println!("{}", "✓ valid".green()),
        Err(e) => {
            println!("{}", format!("✗ {}", e).red());
            issues.push(format!("Configuration invalid: {}", e));
        }
    }

    println!();
    println!("  {}", "Keys:".cyan());
    println!("    Canvus: {}", mask_key(config.surface.api_key.as_deref()));
    println!("    Gemini: {}", mask_key(config.generation.gemini_api_key.as_deref()));
    println!("    OpenAI: {}", mask_key(config.generation.openai_api_key.as_deref()));

    println!();
    print!("  Canvas ({}): ", config.surface.server_url);
    match CanvusClient::new(&config.surface) {
        Ok(client) => match client.ping().await {
            Ok(_) => println!("{}", "✓ reachable".green()),
            Err(e) => {
                println!("{}", format!("✗ {}", e).red());
                issues.push("Cannot reach the canvas".to_string());
            }
        },
        Err(e) => {
            println!("{}", format!("✗ {}", e).red());
            issues.push("Canvas client not configured".to_string());
        }
    }

    print!("  Gemini ({}): ", config.generation.chat_model);
    match GeminiClient::new(&config.generation) {
        Ok(client) => match client.generate_text(&TextRequest::new("Reply with OK.")).await {
            Ok(_) => println!("{}", "✓ responding".green()),
            Err(e) => {
                println!("{}", format!("✗ {}", e).red());
                issues.push("Gemini is not responding".to_string());
            }
        },
        Err(e) => {
            println!("{}", format!("✗ {}", e).red());
            issues.push("Gemini client not configured".to_string());
        }
    }

    print!("  Images: ");
    match OpenAiImageClient::from_config(&config.generation) {
        Ok(Some(_)) => println!("{}", format!("✓ {}", config.generation.image_model).green()),
        Ok(None) => println!("{}", "○ disabled (no OpenAI key)".yellow()),
        Err(e) => {
            println!("{}", format!("✗ {}", e).red());
            issues.push("Image client not configured".to_string());
        }
    }

    println!();
    if issues.is_empty() {
        println!("{}", "✓ All checks passed".green().bold());
        return Ok(());
    }
    println!("{}", format!("✗ {} issue(s) found:", issues.len()).red().bold());
    for issue in &issues {
        println!("  • {}", issue);
    }
    bail!("{} check(s) failed", issues.len())
}
