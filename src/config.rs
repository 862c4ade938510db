use std::{fs, io::Write, path::Path};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    bus::L2Printer,
    cache::GeometryError,
    hierarchy::Hierarchy,
};

/// Runtime knobs. Cache geometry is fixed at compile time.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// 0 prints only the reports, 1 also prints every L2 message.
    pub mode: u8,
    /// Records handed from the trace reader per block.
    pub buffer_size: usize,
    /// Blocks allowed in flight between the reader and the simulator.
    pub queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: 0,
            buffer_size: 1024 * 16,
            queue_size: 32,
        }
    }
}

impl Config {
    pub fn parse(json: &str) -> anyhow::Result<Config> {
        serde_json::from_str(json).context("Config is not valid JSON")
    }

    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Config::parse(&config_str)
    }

    pub fn verbose(&self) -> bool {
        self.mode == 1
    }

    /// Builds both caches, with L2 messages going to `out` in mode 1.
    pub fn to_hierarchy<W: Write>(
        &self,
        out: W,
    ) -> Result<Hierarchy<L2Printer<W>>, GeometryError> {
        Hierarchy::new(L2Printer::new(self.verbose(), out))
    }
}
