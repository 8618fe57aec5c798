// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaJoinConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaJoinConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = NovaJoinConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("novajoin config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaJoinConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static NovaJoinConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAJOIN_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p.trim()));
    }

    let candidate = PathBuf::from("novajoin.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVAJOIN_CONFIG or create ./novajoin.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaJoinConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novajoin=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub hash_join: HashJoinConfig,
}

impl NovaJoinConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: NovaJoinConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.output_batch_rows == 0 {
            return Err(anyhow!("runtime.output_batch_rows must be positive"));
        }
        if self.runtime.scan_unit_rows == 0 {
            return Err(anyhow!("runtime.scan_unit_rows must be positive"));
        }
        Ok(())
    }
}

impl Default for NovaJoinConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            hash_join: HashJoinConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for the default task scheduler; 0 means one per core.
    #[serde(default)]
    pub exec_threads: usize,
    /// Rows accumulated per thread before an output batch is emitted.
    #[serde(default = "default_output_batch_rows")]
    pub output_batch_rows: usize,
    /// Build rows covered by one unmatched-row scan task.
    #[serde(default = "default_scan_unit_rows")]
    pub scan_unit_rows: usize,
}

fn default_output_batch_rows() -> usize {
    4096
}

fn default_scan_unit_rows() -> usize {
    32 * 1024
}

impl RuntimeConfig {
    pub fn actual_exec_threads(&self) -> usize {
        if self.exec_threads > 0 {
            self.exec_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exec_threads: 0,
            output_batch_rows: default_output_batch_rows(),
            scan_unit_rows: default_scan_unit_rows(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HashJoinConfig {
    #[serde(default = "default_enable_bloom_filter")]
    pub enable_bloom_filter: bool,
    /// Smallest build side (in rows) for which a bloom filter is built.
    #[serde(default = "default_bloom_filter_min_build_rows")]
    pub bloom_filter_min_build_rows: usize,
    /// Byte limit for the hash index and bitmap; absent means unlimited.
    #[serde(default)]
    pub mem_limit_bytes: Option<u64>,
}

fn default_enable_bloom_filter() -> bool {
    true
}

fn default_bloom_filter_min_build_rows() -> usize {
    4096
}

impl Default for HashJoinConfig {
    fn default() -> Self {
        Self {
            enable_bloom_filter: default_enable_bloom_filter(),
            bloom_filter_min_build_rows: default_bloom_filter_min_build_rows(),
            mem_limit_bytes: None,
        }
    }
}
