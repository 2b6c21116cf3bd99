use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tierfetch_client::{DecodoClient, RenderClient, StaticClient, XhrClient};
use tierfetch_core::config::{EngineConfig, FallbackConfig, PipelineConfig, PoolConfig};
use tierfetch_core::engine::{BatchReport, FetchEngine};

#[derive(Parser)]
#[command(name = "tierfetch", version, about = "Batch HTML fetcher with tiered escalation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a batch of URLs, escalating through tiers until each resolves
    Fetch {
        /// Target URL (repeatable)
        #[arg(short, long)]
        url: Vec<String>,

        /// File with one URL per line; lines starting with '#' are skipped
        #[arg(short = 'f', long)]
        urls_file: Option<PathBuf>,

        /// Rendering service endpoints, comma separated host:port or full URLs
        #[arg(
            short,
            long,
            env = "TIERFETCH_ENDPOINTS",
            value_delimiter = ',',
            default_value = ""
        )]
        endpoints: Vec<String>,

        /// URLs per rendering batch
        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        /// Cooldown after each successful batch, in seconds
        #[arg(long, default_value_t = 120)]
        cooldown_secs: u64,

        /// Concurrent static/XHR fetches
        #[arg(long, default_value_t = 50)]
        concurrency: usize,

        /// Global deadline for the whole run, in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Remote render API username (enables the paid fallback tier)
        #[arg(long, env = "DECODO_USERNAME")]
        decodo_username: Option<String>,

        /// Remote render API password
        #[arg(long, env = "DECODO_PASSWORD")]
        decodo_password: Option<String>,

        /// Directory to save fetched HTML into, one file per URL
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Include HTML bodies in the JSON report on stdout
        #[arg(long, default_value_t = false)]
        include_html: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing; the JSON report owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tierfetch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            url,
            urls_file,
            endpoints,
            batch_size,
            cooldown_secs,
            concurrency,
            deadline_secs,
            decodo_username,
            decodo_password,
            save_dir,
            include_html,
        } => {
            let urls = collect_urls(url, urls_file.as_deref())?;
            if urls.is_empty() {
                bail!("No URLs given. Use --url or --urls-file.");
            }

            let endpoints: Vec<String> = endpoints
                .into_iter()
                .filter(|e| !e.trim().is_empty())
                .map(|e| e.trim().to_string())
                .collect();

            let mut config = EngineConfig {
                pipeline: PipelineConfig::default().with_concurrency(concurrency),
                pool: PoolConfig::default()
                    .with_endpoints(endpoints)
                    .with_batch_size(batch_size)
                    .with_cooldown(Duration::from_secs(cooldown_secs)),
                ..EngineConfig::default()
            };
            if let Some(secs) = deadline_secs {
                config = config.with_deadline(Duration::from_secs(secs));
            }

            let fallback = match (decodo_username, decodo_password) {
                (Some(username), Some(password)) => {
                    let fallback_config =
                        FallbackConfig::default().with_credentials(username, password);
                    config.fallback = fallback_config.clone();
                    Some(
                        DecodoClient::new(fallback_config)
                            .context("Failed to create remote render client")?,
                    )
                }
                _ => None,
            };

            let report = cmd_fetch(&urls, fallback, config).await?;

            if let Some(dir) = &save_dir {
                save_html(dir, &report)?;
            }
            print_report(&report, include_html)?;
        }
    }

    Ok(())
}

async fn cmd_fetch(
    urls: &[String],
    fallback: Option<DecodoClient>,
    config: EngineConfig,
) -> Result<BatchReport> {
    let static_fetch = StaticClient::with_timeout(config.pipeline.timeout)
        .context("Failed to create HTTP client")?;
    let xhr_fetch = XhrClient::new().context("Failed to create XHR client")?;
    let render = RenderClient::new(config.pool.render_timeout)
        .context("Failed to create render client")?;

    let engine = FetchEngine::new(static_fetch, xhr_fetch, render, fallback, config);
    Ok(engine.run(urls).await)
}

/// Merges --url arguments with the contents of --urls-file, keeping order
/// and dropping duplicates.
fn collect_urls(mut urls: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
        urls.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut seen = std::collections::HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    Ok(urls)
}

/// Writes each successful result's HTML into `dir`, one file per URL.
fn save_html(dir: &Path, report: &BatchReport) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut saved = 0usize;
    for result in &report.results {
        let Some(html) = &result.html else { continue };
        let method = result.method.map(|m| m.as_str()).unwrap_or("unknown");
        let path = dir.join(filename_for(method, &result.url));
        std::fs::write(&path, html)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        saved += 1;
    }
    tracing::info!(saved, dir = %dir.display(), "Saved HTML files");
    Ok(())
}

/// Builds a filesystem-safe filename from the fetch method and URL.
fn filename_for(method: &str, url: &str) -> String {
    let stripped = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut name: String = stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.truncate(100);
    format!("{method}_{name}.html")
}

fn print_report(report: &BatchReport, include_html: bool) -> Result<()> {
    if include_html {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    // Strip bodies so the report stays readable; sizes stand in for them.
    let mut value = serde_json::to_value(report)?;
    if let Some(results) = value.get_mut("results").and_then(|r| r.as_array_mut()) {
        for entry in results {
            let Some(obj) = entry.as_object_mut() else { continue };
            if let Some(html) = obj.get("html").and_then(|h| h.as_str()) {
                let bytes = html.len();
                obj.insert("html_bytes".to_string(), serde_json::json!(bytes));
            }
            obj.remove("html");
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
