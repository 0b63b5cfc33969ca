//! Harvest run: crawl sources, enrich the unique links and write the output

use crate::proxy::crawler::{LinkSource, SourceCrawler};
use crate::proxy::enricher::LinkEnricher;
use crate::proxy::geo::{GeoLookup, HttpGeoLocator, MmdbGeoLocator};
use crate::proxy::models::LinkSet;
use crate::proxy::output::{OutputSummary, OutputWriter};
use crate::proxy::resolver::{DnsResolver, HostResolver};
use crate::{Config, GeoBackend, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestSummary {
    /// Links found per source, in source order
    pub sources: Vec<(String, usize)>,
    /// Sources that could not be fetched
    pub failed_sources: usize,
    /// Distinct links across all sources
    pub unique_links: usize,
    /// Distinct links dropped because their protocol is blocked
    pub blocked_links: usize,
    /// Links sent through enrichment
    pub enriched_links: usize,
    /// Files written
    pub output: OutputSummary,
}

impl HarvestSummary {
    /// Render the summary as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One harvest run wired from its parts
pub struct Harvester {
    sources: Vec<LinkSource>,
    crawler: SourceCrawler,
    enricher: LinkEnricher,
    writer: OutputWriter,
}

impl Harvester {
    pub fn new(
        sources: Vec<LinkSource>,
        crawler: SourceCrawler,
        enricher: LinkEnricher,
        writer: OutputWriter,
    ) -> Self {
        Self {
            sources,
            crawler,
            enricher,
            writer,
        }
    }

    /// Build a harvester with the DNS resolver and the configured geo backend
    pub fn from_config(config: Config) -> Result<Self> {
        let crawler = SourceCrawler::with_config(config.crawler)?;
        let resolver: Arc<dyn HostResolver> =
            Arc::new(DnsResolver::new(config.enricher.dns_timeout)?);
        let geo: Arc<dyn GeoLookup> = match config.geo {
            GeoBackend::Http(geo_config) => Arc::new(HttpGeoLocator::with_config(geo_config)?),
            GeoBackend::Mmdb(path) => Arc::new(MmdbGeoLocator::from_path(path)?),
        };
        let enricher = LinkEnricher::new(config.enricher, resolver, geo);

        Ok(Self::new(
            config.sources,
            crawler,
            enricher,
            OutputWriter::new(config.output),
        ))
    }

    pub fn enricher(&self) -> &LinkEnricher {
        &self.enricher
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    /// Crawl every source, then enrich and write the links found
    pub async fn run(&self) -> Result<HarvestSummary> {
        info!("Crawling {} sources", self.sources.len());
        let results = self.crawler.crawl_sources(&self.sources).await;
        let links = SourceCrawler::collect_links(&results);

        let mut summary = self.process(links).await?;
        summary.sources = results
            .iter()
            .map(|result| (result.source.clone(), result.links.len()))
            .collect();
        summary.failed_sources = results.iter().filter(|r| !r.is_success()).count();
        Ok(summary)
    }

    /// Enrich and write an already collected link set
    pub async fn process(&self, links: LinkSet) -> Result<HarvestSummary> {
        let unique_links = links.len();
        let (kept, blocked): (Vec<String>, Vec<String>) = links
            .into_vec()
            .into_iter()
            .partition(|link| !self.enricher.is_blocked(link));

        info!(
            "Total unique links: {} ({} blocked, {} to enrich)",
            unique_links,
            blocked.len(),
            kept.len()
        );

        let enriched = self.enricher.enrich_all(&kept).await;
        let output = self
            .writer
            .write(&enriched, &self.enricher.config().blocked)?;

        for (protocol, count) in &output.protocols {
            info!("{}: {} links", protocol, count);
        }

        Ok(HarvestSummary {
            unique_links,
            blocked_links: blocked.len(),
            enriched_links: enriched.len(),
            output,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::enricher::EnricherConfig;
    use crate::proxy::geo::tests::StubGeo;
    use crate::proxy::models::Protocol;
    use crate::proxy::output::OutputConfig;
    use crate::proxy::resolver::tests::StubResolver;
    use crate::proxy::rewriter::decode_payload;
    use std::fs;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VMESS_LINK: &str = "vmess://eyJhZGQiOiAiZXhhbXBsZS5jb20ifQ==";

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn harvester(sources: Vec<LinkSource>, output: OutputConfig) -> Harvester {
        let resolver = Arc::new(StubResolver::new(&[
            ("example.com", "1.2.3.4"),
            ("node.example", "5.6.7.8"),
        ]));
        let geo = Arc::new(StubGeo::new(&[("1.2.3.4", "US"), ("5.6.7.8", "NL")]));
        let enricher = LinkEnricher::new(EnricherConfig::new(), resolver, geo);
        Harvester::new(
            sources,
            SourceCrawler::new().unwrap(),
            enricher,
            OutputWriter::new(output),
        )
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/a",
            &format!(
                "{}\ntrojan://pw@node.example:8443#x\nhysteria2://pw@node.example:443",
                VMESS_LINK
            ),
        )
        .await;
        serve(&server, "/b", &format!("mirror of {}\n", VMESS_LINK)).await;

        let sources = vec![
            LinkSource::new("a", &format!("{}/a", server.uri())),
            LinkSource::new("b", &format!("{}/b", server.uri())),
            LinkSource::new("missing", &format!("{}/missing", server.uri())),
        ];
        let dir = tempdir().unwrap();
        let harvester = harvester(sources, OutputConfig::new().with_dir(dir.path()));

        let summary = harvester.run().await.unwrap();

        assert_eq!(summary.sources.len(), 3);
        assert_eq!(summary.failed_sources, 1);
        assert_eq!(summary.unique_links, 3);
        assert_eq!(summary.blocked_links, 1);
        assert_eq!(summary.enriched_links, 2);

        let all = fs::read_to_string(harvester.writer().aggregate_path()).unwrap();
        assert_eq!(all.lines().count(), 2);
        assert!(!all.contains("hysteria2"));
        assert!(all.contains("trojan://pw@5.6.7.8:443#"));

        let vmess_file = harvester.writer().protocol_path(&Protocol::new("vmess"));
        let vmess = fs::read_to_string(vmess_file).unwrap();
        let payload = decode_payload(vmess.trim()).unwrap();
        assert_eq!(payload["add"], "1.2.3.4");
        assert!(payload["ps"].as_str().unwrap().starts_with("\u{1F1FA}\u{1F1F8}"));

        assert!(!harvester
            .writer()
            .protocol_path(&Protocol::new("hysteria2"))
            .exists());
    }

    #[tokio::test]
    async fn test_summary_to_json() {
        let dir = tempdir().unwrap();
        let harvester = harvester(Vec::new(), OutputConfig::new().with_dir(dir.path()));
        let links: LinkSet = vec![
            "trojan://pw@node.example:8443".to_string(),
            "hy2://pw@node.example:443".to_string(),
        ]
        .into_iter()
        .collect();

        let summary = harvester.process(links).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();

        assert_eq!(json["unique_links"], 2);
        assert_eq!(json["blocked_links"], 1);
        assert_eq!(json["enriched_links"], 1);
        assert_eq!(json["output"]["protocols"]["trojan"], 1);
        assert_eq!(json["output"]["files"].as_array().unwrap().len(), 3);
        assert!(json["sources"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_with_no_links_writes_nothing() {
        let dir = tempdir().unwrap();
        let harvester = harvester(Vec::new(), OutputConfig::new().with_dir(dir.path()));

        let summary = harvester.process(LinkSet::new()).await.unwrap();
        assert_eq!(summary.unique_links, 0);
        assert_eq!(summary.output.total_files(), 0);
        assert!(!harvester.writer().aggregate_path().exists());
    }
}
