//! Genpost CLI: submit generations and follow them to completion.
//!
//! Settings come from `{dataDir}/settings.json` and `GENPOST_*` variables.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use genpost_lib::jobs::{
    GenerationEvent, GenerationParams, ImageWatchOutcome, VideoWatchOutcome, WatchHandle,
    DEFAULT_IMAGE_COUNT,
};
use genpost_lib::{build_generator, resolve_data_dir, Settings};

#[derive(Parser)]
#[command(name = "genpost", about = "Generate AI image and video posts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a generation and wait until it is ready
    Generate {
        /// Text prompt
        prompt: String,
        /// Generate a video instead of images
        #[arg(long)]
        video: bool,
        /// Number of images (1-10)
        #[arg(long, default_value_t = DEFAULT_IMAGE_COUNT)]
        count: u32,
    },
    /// Show the status of a video job
    Status {
        /// Job ID returned when the video was submitted
        job_id: String,
    },
    /// List your most recent posts
    Posts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show the in-flight flag and post counts
    State,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Ctrl-C stops the watcher instead of killing the process mid-write.
fn cancel_on_ctrl_c<T>(handle: &WatchHandle<T>) {
    let token = handle.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = resolve_data_dir()?;
    let settings = Settings::load(&data_dir);
    let mut generator = build_generator(&settings, &data_dir)?;
    let resolver = settings.media_resolver();

    generator.set_on_event(Arc::new(|event: GenerationEvent| {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{line}");
        }
    }));

    match cli.command {
        Commands::Generate {
            prompt,
            video,
            count,
        } => {
            if video {
                let (submission, handle) = generator
                    .generate_video(&GenerationParams::video(prompt))
                    .await?;
                print_json(&submission)?;
                cancel_on_ctrl_c(&handle);
                let outcome = handle.join().await?;
                print_json(&outcome)?;
                match outcome {
                    VideoWatchOutcome::Completed { .. } | VideoWatchOutcome::Cancelled => {}
                    VideoWatchOutcome::Failed { message } | VideoWatchOutcome::Exhausted { message } => {
                        bail!(message)
                    }
                }
            } else {
                let mut params = GenerationParams::image(prompt);
                params.image_count = Some(count);
                let handle = generator.generate_image(&params)?;
                cancel_on_ctrl_c(&handle);
                let outcome = handle.join().await?;
                print_json(&outcome)?;
                match outcome {
                    ImageWatchOutcome::NewPost { post_id } => {
                        let post = generator
                            .db()
                            .lock()
                            .map_err(|e| anyhow::anyhow!("db lock: {e}"))?
                            .get_post(&post_id)?;
                        if let Some(post) = post {
                            print_json(&resolver.view(&post))?;
                        }
                    }
                    ImageWatchOutcome::Stopped => bail!("image generation failed"),
                    ImageWatchOutcome::Cancelled => {}
                }
            }
        }
        Commands::Status { job_id } => {
            let status = generator
                .api()
                .job_status(&job_id)
                .await
                .with_context(|| format!("Failed to get status of job {job_id}"))?;
            print_json(&serde_json::json!({
                "jobId": status.job_id,
                "status": status.status,
                "videoUrl": status.video_url(),
                "error": status.error,
                "createdAt": status.created_at,
                "updatedAt": status.updated_at,
            }))?;
        }
        Commands::Posts { limit } => {
            let author = generator
                .author()
                .context("No author configured. Set GENPOST_AUTHOR or authorId in settings.json")?;
            let posts = generator
                .db()
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock: {e}"))?
                .list_posts_by_author(author, limit, 0)?;
            let views: Vec<_> = posts.iter().map(|p| resolver.view(p)).collect();
            print_json(&views)?;
        }
        Commands::State => {
            let stats = match generator.author() {
                Some(author) => Some(
                    generator
                        .db()
                        .lock()
                        .map_err(|e| anyhow::anyhow!("db lock: {e}"))?
                        .get_post_stats(author)?,
                ),
                None => None,
            };
            print_json(&serde_json::json!({
                "generation": generator.store().snapshot(),
                "author": generator.author(),
                "stats": stats,
            }))?;
        }
    }

    Ok(())
}
