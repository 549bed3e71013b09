/*
 * Created on Wed Feb 28 2024
 *
 * This file is a part of Cinnabar
 * Cinnabar is a free and open-source Redis-compatible in-memory key/value
 * store that speaks RESP2 over TCP, with append-only-file and snapshot
 * persistence and asynchronous primary/replica replication.
 *
 * Copyright (c) 2024, The Cinnabar developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # Configuration
//!
//! Settings resolve in three layers: compiled defaults, then an optional
//! YAML configuration file, then `CIN_*` environment variables. The server
//! takes a single optional command-line argument — the path of the file

#[cfg(test)]
mod tests;

use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;

/// The default listening port
pub const DEFAULT_PORT: u16 = 6380;
/// The default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// The default background-save interval in seconds
pub const DEFAULT_SAVE_EVERY: u64 = 120;
/// The default connection cap
pub const DEFAULT_MAXCON: usize = 10000;

/// The resolved, immutable runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSet {
    /// TCP port to listen on
    pub port: u16,
    /// address to bind
    pub bind: String,
    /// connection idle timeout in seconds; 0 disables the timeout
    pub timeout: u64,
    /// TCP keepalive interval in seconds (surfaced via CONFIG GET)
    pub tcp_keepalive: u64,
    /// number of logical databases; this build always runs exactly one
    pub databases: u32,
    /// whether committed writes are appended to the AOF
    pub appendonly: bool,
    /// background snapshot interval in seconds; 0 disables the scheduler
    pub save: u64,
    /// the shared AUTH secret
    pub requirepass: Option<String>,
    /// the directory persistence files live in
    pub dir: String,
    /// `host port` of the primary to replicate from
    pub replicaof: Option<String>,
    /// maximum simultaneous client connections
    pub maxcon: usize,
}

impl Default for ConfigurationSet {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_owned(),
            timeout: 0,
            tcp_keepalive: 300,
            databases: 1,
            appendonly: false,
            save: DEFAULT_SAVE_EVERY,
            requirepass: None,
            dir: ".".to_owned(),
            replicaof: None,
            maxcon: DEFAULT_MAXCON,
        }
    }
}

/// The shape of the optional YAML configuration file; every field may be
/// omitted
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub timeout: Option<u64>,
    #[serde(rename = "tcp-keepalive")]
    pub tcp_keepalive: Option<u64>,
    pub databases: Option<u32>,
    pub appendonly: Option<bool>,
    pub save: Option<u64>,
    pub requirepass: Option<String>,
    pub dir: Option<String>,
    pub replicaof: Option<String>,
    pub maxcon: Option<usize>,
}

/// A configuration stage failure; fatal at startup
#[derive(Debug)]
pub enum ConfigError {
    FileIo(std::io::Error),
    Parse(serde_yaml::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileIo(e) => write!(f, "failed to read the configuration file: {}", e),
            ConfigError::Parse(e) => write!(f, "bad configuration file: {}", e),
            ConfigError::Invalid(what) => write!(f, "invalid configuration: {}", what),
        }
    }
}

impl ConfigurationSet {
    /// Resolve the configuration: defaults, then the optional file, then the
    /// environment
    pub fn resolve(file_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(path) = file_path {
            let raw = fs::read_to_string(path).map_err(ConfigError::FileIo)?;
            let file: ConfigFile = serde_yaml::from_str(&raw).map_err(ConfigError::Parse)?;
            cfg.apply_file(file);
        }
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }
    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(timeout) = file.timeout {
            self.timeout = timeout;
        }
        if let Some(keepalive) = file.tcp_keepalive {
            self.tcp_keepalive = keepalive;
        }
        if let Some(databases) = file.databases {
            self.databases = databases;
        }
        if let Some(appendonly) = file.appendonly {
            self.appendonly = appendonly;
        }
        if let Some(save) = file.save {
            self.save = save;
        }
        if file.requirepass.is_some() {
            self.requirepass = file.requirepass;
        }
        if let Some(dir) = file.dir {
            self.dir = dir;
        }
        if file.replicaof.is_some() {
            self.replicaof = file.replicaof;
        }
        if let Some(maxcon) = file.maxcon {
            self.maxcon = maxcon;
        }
    }
    /// `CIN_PORT`, `CIN_BIND`, `CIN_APPENDONLY`, `CIN_SAVE`,
    /// `CIN_REQUIREPASS`, `CIN_DIR`, `CIN_REPLICAOF`, `CIN_TIMEOUT`
    fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("CIN_PORT") {
            self.port = port;
        }
        if let Ok(bind) = env::var("CIN_BIND") {
            self.bind = bind;
        }
        if let Some(timeout) = env_parse::<u64>("CIN_TIMEOUT") {
            self.timeout = timeout;
        }
        if let Ok(appendonly) = env::var("CIN_APPENDONLY") {
            self.appendonly = matches!(appendonly.as_str(), "yes" | "true" | "1");
        }
        if let Some(save) = env_parse::<u64>("CIN_SAVE") {
            self.save = save;
        }
        if let Ok(pass) = env::var("CIN_REQUIREPASS") {
            if !pass.is_empty() {
                self.requirepass = Some(pass);
            }
        }
        if let Ok(dir) = env::var("CIN_DIR") {
            self.dir = dir;
        }
        if let Ok(replicaof) = env::var("CIN_REPLICAOF") {
            if !replicaof.is_empty() {
                self.replicaof = Some(replicaof);
            }
        }
    }
    fn validate(&self) -> Result<(), ConfigError> {
        if self.databases != 1 {
            return Err(ConfigError::Invalid(
                "this build supports exactly one database".to_owned(),
            ));
        }
        if self.maxcon == 0 {
            return Err(ConfigError::Invalid("maxcon must be positive".to_owned()));
        }
        if let Some(replicaof) = &self.replicaof {
            if self.parse_replicaof_str(replicaof).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "replicaof must look like \"host port\", got \"{replicaof}\""
                )));
            }
        }
        Ok(())
    }
    fn parse_replicaof_str(&self, raw: &str) -> Option<(String, u16)> {
        let mut parts = raw.split_whitespace();
        let host = parts.next()?.to_owned();
        let port: u16 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((host, port))
    }
    /// The primary to replicate from, if this node is a replica
    pub fn replica_of(&self) -> Option<(String, u16)> {
        self.replicaof
            .as_deref()
            .and_then(|raw| self.parse_replicaof_str(raw))
    }
    /// The keys `CONFIG GET` recognizes, with their printable values
    pub fn config_get(&self, key: &str) -> Option<String> {
        let value = match key {
            "port" => self.port.to_string(),
            "bind" => self.bind.clone(),
            "timeout" => self.timeout.to_string(),
            "tcp-keepalive" => self.tcp_keepalive.to_string(),
            "databases" => self.databases.to_string(),
            "appendonly" => if self.appendonly { "yes" } else { "no" }.to_owned(),
            "save" => self.save.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}
