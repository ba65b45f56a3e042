//! Standalone MCP server binary for Genpost.
//!
//! Communicates with AI clients over stdio JSON-RPC. Generations keep
//! being watched in the background for as long as the server runs.

use anyhow::{Context, Result};
use rmcp::{transport::stdio, ServiceExt};
use std::sync::Arc;
use tracing::{info, warn};

use genpost_lib::jobs::{GenerationEvent, NoticeLevel};
use genpost_lib::mcp::GenpostMcp;
use genpost_lib::{build_generator, resolve_data_dir, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Log to stderr so stdout stays clean for MCP JSON-RPC
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let data_dir = resolve_data_dir()?;
    let settings = Settings::load(&data_dir);
    if settings.author_id.is_none() {
        warn!("no author configured; generation tools will ask the user to sign in");
    }

    let mut generator = build_generator(&settings, &data_dir)?;

    // No UI to toast into: surface notices and readiness in the log.
    generator.set_on_event(Arc::new(|event: GenerationEvent| match event {
        GenerationEvent::Notice {
            level: NoticeLevel::Error,
            message,
        } => warn!("{message}"),
        GenerationEvent::Notice { message, .. } => info!("{message}"),
        GenerationEvent::ListingInvalidated { author } => info!(author = %author, "listing refreshed"),
        GenerationEvent::PostReady { post_id, media_type } => {
            info!(post_id = %post_id, media_type = %media_type, "post ready")
        }
        GenerationEvent::VideoReady { job_id, url, .. } => {
            info!(job_id = %job_id, url = %url, "video ready")
        }
    }));

    let server = GenpostMcp::new(Arc::new(generator), settings.media_resolver());

    info!("Genpost MCP server starting on stdio");

    let service = server
        .serve(stdio())
        .await
        .context("MCP server failed to start")?;

    service.waiting().await?;

    Ok(())
}
