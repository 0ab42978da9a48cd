//! Run the agent until interrupted.

use crate::config::mask_key;
use crate::error::AgentError;
use anyhow::{Context, Result};
use personas_core::generation::{CompositeGenerator, GeminiClient, Generator, OpenAiImageClient};
use personas_core::stream::StopReason;
use personas_core::surface::CanvusClient;
use personas_core::{Agent, AgentConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn execute(config: AgentConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    info!(
        server = %config.surface.server_url,
        canvas_id = %config.surface.canvas_id,
        canvus_key = %mask_key(config.surface.api_key.as_deref()),
        gemini_key = %mask_key(config.generation.gemini_api_key.as_deref()),
        chat_model = %config.generation.chat_model,
        "Starting personas agent"
    );

    let canvus = Arc::new(CanvusClient::new(&config.surface).context("Failed to create canvas client")?);
    let text: Arc<dyn Generator> =
        Arc::new(GeminiClient::new(&config.generation).context("Failed to create Gemini client")?);
    let image = OpenAiImageClient::from_config(&config.generation)
        .context("Failed to create image client")?
        .map(|client| Arc::new(client) as Arc<dyn Generator>);
    if image.is_none() {
        warn!("OPENAI_API_KEY not set; persona headshots disabled");
    }
    let generator = Arc::new(CompositeGenerator::new(text, image));

    let cancel = CancellationToken::new();
    let agent = Agent::new(&config, canvus.clone(), canvus, generator, cancel.clone());

    let mut state = agent.stream_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            debug!(state = ?*state.borrow(), "Event feed state changed");
        }
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_cancel.cancel();
        }
    });

    match agent.run().await {
        StopReason::Cancelled => Ok(()),
        StopReason::GaveUp { attempts } => Err(AgentError::FeedUnavailable(attempts).into()),
    }
}
