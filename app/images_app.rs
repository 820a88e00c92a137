use std::io::Write;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use image_freshness::config::{FreshnessConfig, OutputFormat};
use image_freshness::{list_images, ImageSummary, JsonImageStore};
// cargo run --bin images-app -- --images-file images.json --metadata-url http://127.0.0.1:1224

const SHORT_ID_LEN: usize = 12;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // stdout carries the listing
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn short_id(id: &str) -> &str {
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    hex.get(..SHORT_ID_LEN).unwrap_or(hex)
}

fn split_tag(repo_tag: &str) -> (&str, &str) {
    // a ':' before the last '/' belongs to a registry port
    match repo_tag.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (repo_tag, "<none>"),
    }
}

fn write_table(out: &mut impl Write, summaries: &[ImageSummary]) -> std::io::Result<()> {
    let mut rows = vec![(
        "REPOSITORY".to_string(),
        "TAG".to_string(),
        "IMAGE ID".to_string(),
        "NEWEST".to_string(),
    )];
    for summary in summaries {
        let (repo, tag) = summary
            .image
            .repo_tags
            .first()
            .map(|t| split_tag(t))
            .unwrap_or(("<none>", "<none>"));
        rows.push((
            repo.to_string(),
            tag.to_string(),
            short_id(&summary.image.id).to_string(),
            summary.newest.clone(),
        ));
    }

    let repo_w = rows.iter().map(|r| r.0.len()).max().unwrap_or_default();
    let tag_w = rows.iter().map(|r| r.1.len()).max().unwrap_or_default();
    let id_w = rows.iter().map(|r| r.2.len()).max().unwrap_or_default();
    for (repo, tag, id, newest) in rows {
        writeln!(
            out,
            "{:repo_w$}   {:tag_w$}   {:id_w$}   {}",
            repo,
            tag,
            id,
            newest,
            repo_w = repo_w,
            tag_w = tag_w,
            id_w = id_w
        )?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = FreshnessConfig::parse();
    init_tracing(config.verbose);

    let annotator = config.build_annotator()?;
    let store = JsonImageStore::new(&config.images_file);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing with what is known");
            ctrl_c.cancel();
        }
    });

    let summaries = list_images(&store, &annotator, &cancel).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match config.format {
        OutputFormat::Table => write_table(&mut out, &summaries)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &summaries)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
