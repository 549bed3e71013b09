/*
 * Created on Mon Mar 11 2024
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

//! # Cinnabar
//!
//! The `cinnabard` crate is the Cinnabar database server: a
//! Redis-compatible in-memory key/value store speaking RESP2 over TCP with
//! append-only-file and snapshot persistence and asynchronous replication.
//! See the individual modules for their documentation.

use crate::auth::AuthProvider;
use crate::config::ConfigurationSet;
use crate::dbnet::Terminator;
use crate::queryengine::Engine;
use env_logger::Builder;
use libcinnabar::util::terminal;
use libcinnabar::{URL, VERSION};
use std::env;
use std::fs;
use std::io::Write;
use std::path;
use std::process;
use std::thread;
use std::time;
use tokio::sync::broadcast;

mod actions;
mod auth;
mod config;
mod corestore;
mod dbnet;
mod diskstore;
mod protocol;
mod queryengine;
mod registry;
mod replication;
mod services;
#[cfg(test)]
mod tests;
mod txn;
mod util;

/// A generic I/O result
pub type IoResult<T> = std::io::Result<T>;

const PATH: &str = ".cinnabar_pid";

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
/// Jemallocator - this is the default memory allocator for platforms other than msvc
static GLOBAL: Jemalloc = Jemalloc;

/// The terminal art shown on startup
static TEXT: &str = "\n ██████ ██ ███    ██ ███    ██  █████  ██████   █████  ██████  \n██      ██ ████   ██ ████   ██ ██   ██ ██   ██ ██   ██ ██   ██ \n██      ██ ██ ██  ██ ██ ██  ██ ███████ ██████  ███████ ██████  \n██      ██ ██  ██ ██ ██  ██ ██ ██   ██ ██   ██ ██   ██ ██   ██ \n ██████ ██ ██   ████ ██   ████ ██   ██ ██████  ██   ██ ██   ██ \n                                                               ";

fn main() {
    Builder::new()
        .parse_filters(&env::var("CIN_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
    let cfg = check_args_and_get_cfg();
    // check if any other process is using the data directory and lock it if
    // not (else error)
    let pid_file = run_pre_startup_tasks();
    println!("Cinnabar v{} | {}\n{}", VERSION, URL, TEXT);
    // Start the server which asynchronously waits for a CTRL+C signal which
    // will safely shut it down
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("server")
        .enable_all()
        .build()
        .unwrap();
    let engine = runtime.block_on(run(cfg));
    // Make sure all background workers terminate
    drop(runtime);
    log::info!("Stopped accepting incoming connections");
    loop {
        // Keep looping until we successfully write the in-memory table to
        // disk
        let table = engine.store.read();
        match engine.persist.save_rdb(&table) {
            Ok(()) => {
                drop(table);
                log::info!("Successfully saved data to disk");
                break;
            }
            Err(e) => {
                drop(table);
                log::error!(
                    "Failed to write data with error '{}'. Attempting to retry in 10s",
                    e
                );
            }
        }
        thread::sleep(time::Duration::from_secs(10));
    }
    // close the PID file and remove it
    drop(pid_file);
    if let Err(e) = fs::remove_file(PATH) {
        log::error!("Shutdown failure: Failed to remove pid file: {}", e);
        process::exit(0x100);
    }
    let _ = terminal::write_info("Goodbye :)\n");
}

/// The async lifetime of the server: bring up the engine, the listener and
/// the background services, then wait for ctrl-c and drain everything
async fn run(cfg: ConfigurationSet) -> Engine {
    let engine = match Engine::init(cfg) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Startup failure: {}", e);
            process::exit(0x100);
        }
    };
    let auth = AuthProvider::new(engine.cfg.requirepass.clone());
    if auth.is_enabled() {
        log::info!("Client authentication is enabled");
    }
    let (signal, _) = broadcast::channel::<()>(1);
    let mut listener = match dbnet::connect(&engine, auth, signal.clone()).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Startup failure: {}", e);
            process::exit(0x100);
        }
    };
    let bgsave = tokio::spawn(services::bgsave_scheduler(
        engine.clone(),
        engine.cfg.save,
        Terminator::new(signal.subscribe()),
    ));
    let sweeper = tokio::spawn(services::expiry_sweeper(
        engine.store.clone(),
        Terminator::new(signal.subscribe()),
    ));
    let replica_link = engine.cfg.replica_of().map(|(host, port)| {
        tokio::spawn(replication::replica::run_replica(
            engine.clone(),
            host,
            port,
            Terminator::new(signal.subscribe()),
        ))
    });
    tokio::select! {
        outcome = listener.run() => {
            if let Err(e) = outcome {
                log::error!("Listener failed with: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Termination signal received");
        }
    }
    // fan the shutdown out and wait for every task to drain
    let _ = signal.send(());
    let _ = bgsave.await;
    let _ = sweeper.await;
    if let Some(link) = replica_link {
        let _ = link.await;
    }
    listener.base.release_self().await;
    engine
}

/// This function checks the command line arguments (a single optional
/// configuration file path) and either returns a config object or prints an
/// error to `stderr` and terminates the server
fn check_args_and_get_cfg() -> ConfigurationSet {
    let file = env::args().nth(1);
    match ConfigurationSet::resolve(file.as_deref()) {
        Ok(cfg) => {
            if file.is_some() {
                log::info!("Using settings from the supplied configuration");
            } else {
                log::warn!("No configuration file supplied. Using default settings");
            }
            cfg
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(0x100);
        }
    }
}

/// On startup we attempt to check if a `.cinnabar_pid` file exists. If it
/// does, the file holds the PID of the process already using this
/// directory: log an error and refuse to start. Otherwise write our own PID
/// to it. This prevents two processes from writing to the same directory,
/// which would corrupt persistence
fn run_pre_startup_tasks() -> fs::File {
    let path = path::Path::new(PATH);
    if path.exists() {
        let pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
        log::error!(
            "Startup failure: Another process with PID {} is using the data directory",
            pid
        );
        process::exit(0x100);
    }
    let mut file = match fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(PATH)
    {
        Ok(file) => file,
        Err(e) => {
            log::error!("Startup failure: Failed to open pid file: {}", e);
            process::exit(0x100);
        }
    };
    if let Err(e) = file.write_all(process::id().to_string().as_bytes()) {
        log::error!("Startup failure: Failed to write to pid file: {}", e);
        process::exit(0x100);
    }
    file
}
