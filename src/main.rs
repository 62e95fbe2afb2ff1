use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};
use std::path::PathBuf;
use techblog::config::Config;
use techblog::publish::{render, ImageValidator, Publisher};
use techblog::store::{ArticleStore, DatabaseStore, FsBlobStore, MemoryStore};
use techblog_core::ArticleDraft;
use tracing::info;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(name = "techblog", version, about = "Article publishing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sanitized HTML for a markdown file
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Validate an image against the upload limits and print a JSON report
    CheckImage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Create the database tables
    Migrate,
    /// Create an article from a markdown file
    Publish {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: String,
        /// Comma separated tag names
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        excerpt: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        published: bool,
        /// Keep everything in memory; nothing is written to the database
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;

    match cli.command {
        Command::Render { file } => {
            let raw = tokio::fs::read_to_string(&file).await?;
            println!("{}", render(&raw));
        }
        Command::CheckImage { file } => {
            let bytes = tokio::fs::read(&file).await?;
            let validator = ImageValidator::new(config.publishing().upload.clone());
            let report = match validator.validate(bytes) {
                Ok(image) => serde_json::json!({ "accepted": true, "image": image }),
                Err(why) => serde_json::json!({ "accepted": false, "reason": why.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Migrate => {
            let store = DatabaseStore::connect(config.database_url()?).await?;
            store.create_schema().await?;
            info!("schema created");
        }
        Command::Publish {
            file,
            title,
            category,
            tags,
            excerpt,
            image,
            published,
            dry_run,
        } => {
            let draft = ArticleDraft {
                title,
                content: tokio::fs::read_to_string(&file).await?,
                excerpt,
                published,
                category,
                tags,
            };
            let image: Option<Bytes> = match image {
                Some(path) => Some(tokio::fs::read(path).await?.into()),
                None => None,
            };
            let blobs = FsBlobStore::new(config.media_root());
            if dry_run {
                publish(Publisher::new(MemoryStore::new(), blobs, config.publishing()), draft, image).await?;
            } else {
                let store = DatabaseStore::connect(config.database_url()?).await?;
                publish(Publisher::new(store, blobs, config.publishing()), draft, image).await?;
            }
        }
    }

    Ok(())
}

async fn publish<S: ArticleStore>(
    publisher: Publisher<S, FsBlobStore>,
    draft: ArticleDraft,
    image: Option<Bytes>,
) -> Result<()> {
    let article = publisher
        .create_article(draft, image)
        .await
        .map_err(|why| Report::new(why).wrap_err("could not publish"))?;
    println!("{}", serde_json::to_string_pretty(&article)?);
    Ok(())
}
