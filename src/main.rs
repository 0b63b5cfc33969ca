use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use link_harvest::{
    proxy::{
        group_by_protocol, BlockList, CrawlerConfig, EnricherConfig, GeoHttpConfig, HarvestSummary,
        Harvester, LinkParser, LinkSource, OutputConfig,
    },
    Config, GeoBackend,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Source list read when no source is given on the command line
const DEFAULT_SOURCE_FILE: &str = "sources.txt";

/// Harvest proxy links, resolve and geo-tag them, and write them by protocol
///
/// Without a subcommand the harvest flags are accepted at the top level.
#[derive(Parser)]
#[command(name = "link-harvest")]
#[command(about = "Harvest proxy links, resolve and geo-tag them, and write them by protocol")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    harvest: HarvestArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl sources, enrich every link and write the output files (default)
    Harvest(HarvestArgs),
    /// Extract and deduplicate links from a local file without enriching
    Extract {
        /// Input file containing links
        input: PathBuf,
    },
    /// Enrich links from a local file and write the output files
    Enrich {
        /// Input file containing links
        input: PathBuf,
        #[command(flatten)]
        enrich: EnrichArgs,
    },
}

#[derive(Args)]
struct HarvestArgs {
    /// Source URLs to crawl (can specify multiple)
    #[arg(short, long)]
    source: Vec<String>,
    /// File containing list of source URLs (one URL per line), defaults to sources.txt
    #[arg(short = 'f', long)]
    source_file: Option<PathBuf>,
    /// Timeout in seconds for fetching a source
    #[arg(long, default_value = "30")]
    source_timeout: u64,
    #[command(flatten)]
    enrich: EnrichArgs,
}

#[derive(Args)]
struct EnrichArgs {
    /// Output directory
    #[arg(short, long, default_value = "output")]
    output: PathBuf,
    /// Number of concurrent enrichment workers
    #[arg(short = 'n', long, default_value = "20")]
    concurrency: usize,
    /// Number of links in the light file
    #[arg(long, default_value = "30")]
    light: usize,
    /// Port written into rewritten links
    #[arg(long, default_value = "443")]
    port: u16,
    /// Protocol to block (can specify multiple, replaces the default list)
    #[arg(long)]
    block: Vec<String>,
    /// Timeout in seconds for DNS and geolocation lookups
    #[arg(long, default_value = "15")]
    timeout: u64,
    /// Geolocation endpoint, `{ip}` is replaced with the address
    #[arg(long)]
    geo_endpoint: Option<String>,
    /// JSON field holding the country code in the geolocation response
    #[arg(long)]
    geo_field: Option<String>,
    /// Use a local MaxMind City database instead of the HTTP service
    #[arg(long)]
    mmdb: Option<PathBuf>,
    /// Channel marker placed in every tag
    #[arg(long)]
    marker: Option<String>,
    /// Print the run summary as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl EnrichArgs {
    fn into_config(self) -> Config {
        let timeout = Duration::from_secs(self.timeout);

        let blocked = if self.block.is_empty() {
            BlockList::default()
        } else {
            BlockList::from_tags(&self.block)
        };
        let mut enricher = EnricherConfig::new()
            .with_concurrency(self.concurrency)
            .with_port(self.port)
            .with_blocked(blocked)
            .with_dns_timeout(timeout);
        if let Some(marker) = self.marker {
            enricher = enricher.with_marker(marker);
        }

        let geo = match self.mmdb {
            Some(path) => GeoBackend::Mmdb(path),
            None => {
                let mut geo_config = GeoHttpConfig::new().with_timeout(timeout);
                if let Some(endpoint) = self.geo_endpoint {
                    geo_config = geo_config.with_endpoint(endpoint);
                }
                if let Some(field) = self.geo_field {
                    geo_config = geo_config.with_country_field(field);
                }
                GeoBackend::Http(geo_config)
            }
        };

        Config::new()
            .with_enricher(enricher)
            .with_geo(geo)
            .with_output(
                OutputConfig::new()
                    .with_dir(self.output)
                    .with_light_size(self.light),
            )
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Gather sources from the flags, falling back to the default source list
fn gather_sources(
    source: &[String],
    source_file: Option<&Path>,
    fallback: &Path,
) -> Result<Vec<LinkSource>> {
    let mut sources: Vec<LinkSource> = source.iter().map(|url| LinkSource::from_url(url)).collect();

    let file_path = match source_file {
        Some(path) => Some(path),
        None if sources.is_empty() && fallback.exists() => Some(fallback),
        None => None,
    };
    if let Some(file_path) = file_path {
        info!("Reading sources from {:?}...", file_path);
        let from_file = LinkSource::load_list(file_path)?;
        info!("Loaded {} sources from file", from_file.len());
        sources.extend(from_file);
    }

    if sources.is_empty() {
        return Err(anyhow!(
            "No sources given. Use --source URL, --source-file PATH or create {}",
            fallback.display()
        ));
    }
    Ok(sources)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Harvest(cli.harvest)) {
        Commands::Harvest(HarvestArgs {
            source,
            source_file,
            source_timeout,
            enrich,
        }) => {
            let sources = gather_sources(
                &source,
                source_file.as_deref(),
                Path::new(DEFAULT_SOURCE_FILE),
            )?;

            let json = enrich.json;
            let config = enrich
                .into_config()
                .with_sources(sources)
                .with_crawler(
                    CrawlerConfig::new().with_timeout(Duration::from_secs(source_timeout)),
                );
            let summary = Harvester::from_config(config)?.run().await?;
            report(&summary, json)?;
        }
        Commands::Extract { input } => {
            let links = LinkParser::parse_file(&input)?;
            println!("Extracted {} unique links from {:?}", links.len(), input);

            let all: Vec<String> = links.into_vec();
            for link in &all {
                println!("{}", link);
            }

            let blocked = BlockList::default();
            println!();
            for (protocol, group) in group_by_protocol(&all, &BlockList::empty()) {
                let marker = if blocked.is_blocked(&protocol) {
                    " (blocked)"
                } else {
                    ""
                };
                println!("  {}: {}{}", protocol, group.len(), marker);
            }
        }
        Commands::Enrich { input, enrich } => {
            let links = LinkParser::parse_file(&input)?;
            info!("Loaded {} unique links from {:?}", links.len(), input);

            let json = enrich.json;
            let harvester = Harvester::from_config(enrich.into_config())?;
            let summary = harvester.process(links).await?;
            report(&summary, json)?;
        }
    }

    Ok(())
}

fn report(summary: &HarvestSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    for (source, count) in &summary.sources {
        println!("Found {} links from {}", count, source);
    }
    println!(
        "Results: {} unique, {} blocked, {} enriched",
        summary.unique_links, summary.blocked_links, summary.enriched_links
    );
    if summary.failed_sources > 0 {
        println!("{} sources could not be fetched", summary.failed_sources);
    }
    println!("Wrote {} files", summary.output.total_files());
    Ok(())
}
