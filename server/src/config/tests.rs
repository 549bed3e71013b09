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

use super::{ConfigFile, ConfigurationSet, DEFAULT_PORT};

#[test]
fn defaults_are_sane() {
    let cfg = ConfigurationSet::default();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.bind, "127.0.0.1");
    assert_eq!(cfg.databases, 1);
    assert!(!cfg.appendonly);
    assert!(cfg.requirepass.is_none());
    assert!(cfg.replica_of().is_none());
}

#[test]
fn file_layer_overrides_defaults() {
    let file: ConfigFile = serde_yaml::from_str(
        r#"
port: 7000
appendonly: true
requirepass: "hunter2"
save: 30
tcp-keepalive: 60
"#,
    )
    .unwrap();
    let mut cfg = ConfigurationSet::default();
    cfg.apply_file(file);
    assert_eq!(cfg.port, 7000);
    assert!(cfg.appendonly);
    assert_eq!(cfg.requirepass.as_deref(), Some("hunter2"));
    assert_eq!(cfg.save, 30);
    assert_eq!(cfg.tcp_keepalive, 60);
    // untouched fields keep their defaults
    assert_eq!(cfg.bind, "127.0.0.1");
}

#[test]
fn unknown_file_keys_are_rejected() {
    let parsed: Result<ConfigFile, _> = serde_yaml::from_str("bogus: 1");
    assert!(parsed.is_err());
}

#[test]
fn replicaof_parsing() {
    let mut cfg = ConfigurationSet::default();
    cfg.replicaof = Some("10.0.0.5 6380".to_owned());
    assert_eq!(cfg.replica_of(), Some(("10.0.0.5".to_owned(), 6380)));
    cfg.replicaof = Some("nonsense".to_owned());
    assert_eq!(cfg.replica_of(), None);
}

#[test]
fn config_get_covers_the_advertised_keys() {
    let cfg = ConfigurationSet::default();
    for key in [
        "port",
        "bind",
        "timeout",
        "tcp-keepalive",
        "databases",
        "appendonly",
        "save",
    ] {
        assert!(cfg.config_get(key).is_some(), "missing key {key}");
    }
    assert_eq!(cfg.config_get("port").as_deref(), Some("6380"));
    assert_eq!(cfg.config_get("appendonly").as_deref(), Some("no"));
    // unknown (and sensitive) keys are not exposed
    assert!(cfg.config_get("requirepass").is_none());
    assert!(cfg.config_get("bogus").is_none());
}
