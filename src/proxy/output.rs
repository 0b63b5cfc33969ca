//! Output module for grouping enriched links and writing them to disk
//!
//! Layout under the output directory:
//! - `all.txt`: every non-blocked link
//! - `light.txt`: the first N links of `all.txt`
//! - `protocols/<protocol>.txt`: one file per protocol
//!
//! Files are overwritten, and only written when they would not be empty.

use crate::proxy::models::{BlockList, Protocol};
use crate::proxy::parser::LinkParser;
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default output directory
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Default number of links in the light file
const DEFAULT_LIGHT_SIZE: usize = 30;

const AGGREGATE_FILE: &str = "all.txt";
const LIGHT_FILE: &str = "light.txt";
const PROTOCOL_DIR: &str = "protocols";

/// Partition links by protocol, dropping blocked protocols
///
/// Links keep their relative order within each group.
pub fn group_by_protocol(links: &[String], blocked: &BlockList) -> BTreeMap<Protocol, Vec<String>> {
    let mut groups: BTreeMap<Protocol, Vec<String>> = BTreeMap::new();
    for link in links {
        let protocol = LinkParser::classify(link);
        if blocked.is_blocked(&protocol) {
            continue;
        }
        groups.entry(protocol).or_default().push(link.clone());
    }
    groups
}

/// Configuration for output writing
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Directory receiving the output files
    pub dir: PathBuf,
    /// Number of links in the light file
    pub light_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            light_size: DEFAULT_LIGHT_SIZE,
        }
    }
}

impl OutputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_light_size(mut self, light_size: usize) -> Self {
        self.light_size = light_size;
        self
    }
}

/// Files produced by one write
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputSummary {
    /// Each written file with its number of links
    pub files: Vec<(PathBuf, usize)>,
    /// Link count per protocol
    pub protocols: BTreeMap<Protocol, usize>,
}

impl OutputSummary {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// Writes enriched links to the output directory
pub struct OutputWriter {
    config: OutputConfig,
}

impl OutputWriter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.config.dir.join(AGGREGATE_FILE)
    }

    pub fn light_path(&self) -> PathBuf {
        self.config.dir.join(LIGHT_FILE)
    }

    pub fn protocol_path(&self, protocol: &Protocol) -> PathBuf {
        self.config
            .dir
            .join(PROTOCOL_DIR)
            .join(format!("{}.txt", protocol))
    }

    /// Write the aggregate, light and per-protocol files
    pub fn write(&self, links: &[String], blocked: &BlockList) -> Result<OutputSummary> {
        let mut summary = OutputSummary::default();
        let groups = group_by_protocol(links, blocked);
        let aggregate: Vec<String> = links
            .iter()
            .filter(|link| !blocked.is_blocked(&LinkParser::classify(link)))
            .cloned()
            .collect();

        self.write_list(&self.aggregate_path(), &aggregate, &mut summary)?;

        let light_len = aggregate.len().min(self.config.light_size);
        self.write_list(&self.light_path(), &aggregate[..light_len], &mut summary)?;

        for (protocol, group) in &groups {
            self.write_list(&self.protocol_path(protocol), group, &mut summary)?;
            summary.protocols.insert(protocol.clone(), group.len());
        }

        Ok(summary)
    }

    fn write_list(&self, path: &Path, links: &[String], summary: &mut OutputSummary) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, links.join("\n"))?;
        info!("Saved {} links to {:?}", links.len(), path);
        summary.files.push((path.to_path_buf(), links.len()));
        Ok(())
    }
}
