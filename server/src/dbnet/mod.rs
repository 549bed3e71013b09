/*
 * Created on Thu Mar 07 2024
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

//! # Database networking
//!
//! The TCP accept loop and the per-connection task. Each accepted socket
//! gets its own [`ConnectionHandler`] holding the connection-local state:
//! the auth gate, the transaction state and (for a would-be replica) the
//! pending REPLCONF fields. A semaphore caps concurrent connections; a
//! broadcast channel fans the shutdown signal out and an mpsc channel
//! tracks when every handler has drained.

pub mod connection;

use crate::auth::{AuthHandle, AuthProvider};
use crate::protocol::responses::groups;
use crate::protocol::{Command, Frame};
use crate::queryengine::Engine;
use crate::txn::TxnState;
use crate::util::error::{CinResult, Error};
use crate::IoResult;
use connection::{BatchResult, Connection};
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;

/// The hard cap on the connection semaphore
pub const MAXIMUM_CONNECTION_LIMIT: usize = 50000;

/// Check for termination signals delivered over the shutdown broadcast
pub struct Terminator {
    signal: broadcast::Receiver<()>,
    terminate_now: bool,
}

impl Terminator {
    pub fn new(signal: broadcast::Receiver<()>) -> Self {
        Self {
            signal,
            terminate_now: false,
        }
    }
    pub fn is_termination_signal(&self) -> bool {
        self.terminate_now
    }
    /// Wait for the signal. A closed channel counts as a signal too: that
    /// happens when the sender is dropped during shutdown
    pub async fn receive_signal(&mut self) {
        let _ = self.signal.recv().await;
        self.terminate_now = true;
    }
}

/// A backoff implementation that is meant to be used in accept/connect loops
pub(crate) struct NetBackoff {
    c: Cell<u8>,
}

impl NetBackoff {
    /// The maximum backoff duration in seconds
    const MAX_BACKOFF: u8 = 64;
    pub const fn new() -> Self {
        Self { c: Cell::new(1) }
    }
    /// Wait for the current backoff duration and double it
    pub async fn spin(&mut self) {
        time::sleep(Duration::from_secs(self.c.get() as _)).await;
        self.c.set(self.c.get().saturating_mul(2));
    }
    /// Should we give up on this peer?
    pub fn should_disconnect(&self) -> bool {
        self.c.get() > Self::MAX_BACKOFF
    }
}

/// The base TCP listener: the bound socket plus everything a spawned
/// connection handler needs a clone of
pub struct BaseListener {
    pub engine: Engine,
    pub auth: AuthProvider,
    pub listener: TcpListener,
    pub climit: Arc<Semaphore>,
    pub signal: broadcast::Sender<()>,
    // when every handler drops its clone of `terminate_tx`, `terminate_rx`
    // wakes up and shutdown can finish
    pub terminate_tx: mpsc::Sender<()>,
    pub terminate_rx: mpsc::Receiver<()>,
}

impl BaseListener {
    pub async fn init(
        engine: &Engine,
        auth: AuthProvider,
        signal: broadcast::Sender<()>,
    ) -> CinResult<Self> {
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let port = engine.cfg.port;
        let listener = TcpListener::bind((engine.cfg.bind.as_str(), port))
            .await
            .map_err(|e| Error::ioerror_extra(e, format!("binding to port {port}")))?;
        let maxcon = engine.cfg.maxcon.min(MAXIMUM_CONNECTION_LIMIT);
        Ok(Self {
            engine: engine.clone(),
            auth,
            listener,
            climit: Arc::new(Semaphore::new(maxcon)),
            signal,
            terminate_tx,
            terminate_rx,
        })
    }
    /// Wait for every connection handler to finish after the termination
    /// signal went out
    pub async fn release_self(self) {
        let Self {
            mut terminate_rx,
            terminate_tx,
            signal,
            ..
        } = self;
        drop(signal);
        drop(terminate_tx);
        let _ = terminate_rx.recv().await;
    }
}

/// The plain TCP listener
pub struct Listener {
    pub base: BaseListener,
}

impl Listener {
    pub fn new(base: BaseListener) -> Self {
        Self { base }
    }
    /// Accept an incoming connection, backing off on transient failures
    async fn accept(&mut self) -> IoResult<(TcpStream, String)> {
        let mut backoff = NetBackoff::new();
        loop {
            match self.base.listener.accept().await {
                Ok((stream, peer)) => return Ok((stream, peer.to_string())),
                Err(e) => {
                    if backoff.should_disconnect() {
                        return Err(e);
                    }
                }
            }
            backoff.spin().await;
        }
    }
    /// Run the accept loop until the process shuts down
    pub async fn run(&mut self) -> IoResult<()> {
        loop {
            // take a permit up front; it is restored by the handler's Drop
            match self.base.climit.acquire().await {
                Ok(permit) => permit.forget(),
                // the semaphore never closes while the listener lives
                Err(_) => return Ok(()),
            }
            /*
             Ignore transient accept errors instead of bringing the whole
             server down, and don't log each one: a misbehaving peer could
             flood the log
            */
            let (stream, peer) = match self.accept().await {
                Ok(accepted) => accepted,
                Err(_) => {
                    self.base.climit.add_permits(1);
                    continue;
                }
            };
            let mut chandle = ConnectionHandler::new(
                self.base.engine.clone(),
                Connection::new(stream),
                self.base.auth.clone(),
                peer,
                self.base.climit.clone(),
                self.base.signal.subscribe(),
                self.base.terminate_tx.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = chandle.run().await {
                    log::error!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Whether the handler should keep serving this connection
#[derive(PartialEq)]
enum Flow {
    Continue,
    Close,
}

/// A per-connection handler: owns the socket, the auth state and the
/// transaction state. Runs until disconnect, protocol error, idle timeout
/// or shutdown
pub struct ConnectionHandler {
    engine: Engine,
    con: Connection,
    auth: AuthHandle,
    txn: TxnState,
    peer: String,
    repl_listening_port: Option<u16>,
    climit: Arc<Semaphore>,
    termination_signal: broadcast::Receiver<()>,
    _term_sig_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Engine,
        con: Connection,
        auth: AuthProvider,
        peer: String,
        climit: Arc<Semaphore>,
        termination_signal: broadcast::Receiver<()>,
        _term_sig_tx: mpsc::Sender<()>,
    ) -> Self {
        engine.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        engine
            .stats
            .current_connections
            .fetch_add(1, Ordering::Relaxed);
        Self {
            engine,
            con,
            auth: AuthHandle::new(auth),
            txn: TxnState::new(),
            peer,
            repl_listening_port: None,
            climit,
            termination_signal,
            _term_sig_tx,
        }
    }
    pub async fn run(&mut self) -> IoResult<()> {
        log::debug!("Serving {}", self.peer);
        let idle = self.engine.cfg.timeout;
        loop {
            let batch = tokio::select! {
                batch = Self::read_with_idle_limit(&mut self.con, idle) => batch,
                _ = self.termination_signal.recv() => return Ok(()),
            };
            match batch? {
                Some(BatchResult::Frames(frames)) => {
                    for frame in frames {
                        if self.handle_frame(frame).await? == Flow::Close {
                            return Ok(());
                        }
                    }
                    // one flush per pipelined batch
                    self.con.flush().await?;
                }
                Some(BatchResult::Disconnected) => return Ok(()),
                Some(BatchResult::Protocol(e)) => {
                    log::debug!("Protocol error from {}: {:?}", self.peer, e);
                    self.con
                        .write_error(&groups::protocol_error(&format!("{e:?}")))
                        .await?;
                    self.con.flush().await?;
                    return Ok(());
                }
                // idle timeout
                None => {
                    log::debug!("Closing {} after idle timeout", self.peer);
                    return Ok(());
                }
            }
        }
    }
    /// Read the next batch, bounded by the configured idle timeout.
    /// `Ok(None)` means the timeout lapsed
    async fn read_with_idle_limit(
        con: &mut Connection,
        idle_secs: u64,
    ) -> IoResult<Option<BatchResult>> {
        if idle_secs == 0 {
            return con.read_batch().await.map(Some);
        }
        match time::timeout(Duration::from_secs(idle_secs), con.read_batch()).await {
            Ok(batch) => batch.map(Some),
            Err(_) => Ok(None),
        }
    }
    async fn handle_frame(&mut self, frame: Frame) -> IoResult<Flow> {
        let cmd = match Command::from_frame(frame) {
            Ok(Some(cmd)) => cmd,
            // a blank inline line; nothing to do
            Ok(None) => return Ok(Flow::Continue),
            Err(what) => {
                self.con
                    .write_error(&groups::protocol_error(what))
                    .await?;
                self.con.flush().await?;
                return Ok(Flow::Close);
            }
        };
        let name = cmd.name_uppercase();
        if !self.auth.authenticated() && name != "AUTH" {
            self.con.write_error(groups::NOAUTH).await?;
            return Ok(Flow::Continue);
        }
        match name.as_str() {
            "AUTH" => self.handle_auth(&cmd).await?,
            "REPLCONF" => self.handle_replconf(&cmd).await?,
            "PSYNC" | "SYNC" => {
                self.serve_replica(&cmd).await?;
                return Ok(Flow::Close);
            }
            _ => {
                let reply = self.engine.execute(&mut self.txn, cmd);
                self.con.write_frame(&reply).await?;
            }
        }
        Ok(Flow::Continue)
    }
    async fn handle_auth(&mut self, cmd: &Command) -> IoResult<()> {
        if cmd.arg_count() != 1 {
            return self.con.write_error(&groups::wrong_arity("auth")).await;
        }
        if !self.auth.provider().is_enabled() {
            return self.con.write_error(groups::AUTH_WITHOUT_PASSWORD).await;
        }
        if self.auth.provider().check(&cmd.args()[0]) {
            self.auth.set_auth();
            self.con.write_frame(&Frame::ok()).await
        } else {
            self.con.write_error(groups::BAD_AUTH).await
        }
    }
    /// `REPLCONF listening-port <p>` / `REPLCONF capa …`: record what we
    /// can, acknowledge everything
    async fn handle_replconf(&mut self, cmd: &Command) -> IoResult<()> {
        let args = cmd.args();
        let mut at = 0;
        while at + 1 < args.len() {
            if args[at].eq_ignore_ascii_case(b"listening-port") {
                self.repl_listening_port = std::str::from_utf8(&args[at + 1])
                    .ok()
                    .and_then(|raw| raw.parse().ok());
            }
            at += 2;
        }
        self.con.write_frame(&Frame::ok()).await
    }
    /// PSYNC/SYNC: flip this connection into a replication feed. Sends
    /// `+FULLRESYNC`, the snapshot bulk, then streams every committed write
    /// until the replica goes away or the server shuts down
    async fn serve_replica(&mut self, cmd: &Command) -> IoResult<()> {
        // PSYNC <replid> <offset>; SYNC is the legacy no-argument alias
        if let Some(replid) = cmd.args().first() {
            let known = replid.as_ref() == self.engine.repl.run_id().as_bytes();
            let requested_offset = cmd
                .args()
                .get(1)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|raw| raw.parse::<u64>().ok());
            if known && requested_offset.is_some_and(|off| self.engine.repl.in_backlog(off)) {
                // a partial resync would be possible; this build always
                // answers with a full one
                log::debug!("Replica {} qualified for partial resync; sending full", self.peer);
            }
        }
        let (id, offset, image, mut feed) = self
            .engine
            .fullresync_image(self.peer.clone(), self.repl_listening_port);
        log::info!(
            "Replica {} attached (offset {}, {} byte snapshot)",
            self.peer,
            offset,
            image.len()
        );
        let header = format!("+FULLRESYNC {} {}\r\n", self.engine.repl.run_id(), offset);
        let outcome = self.feed_replica(header, image, &mut feed).await;
        self.engine.repl.unregister_replica(id);
        log::info!("Replica {} detached", self.peer);
        outcome
    }
    async fn feed_replica(
        &mut self,
        header: String,
        image: Vec<u8>,
        feed: &mut tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>,
    ) -> IoResult<()> {
        self.con.write_raw(header.as_bytes()).await?;
        self.con
            .write_frame(&Frame::Bulk(bytes::Bytes::from(image)))
            .await?;
        self.con.flush().await?;
        loop {
            tokio::select! {
                shipped = feed.recv() => match shipped {
                    Some(raw) => {
                        self.con.write_raw(&raw).await?;
                        self.con.flush().await?;
                    }
                    None => return Ok(()),
                },
                _ = self.termination_signal.recv() => return Ok(()),
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // return the permit even if the handler panicked
        self.climit.add_permits(1);
        self.engine
            .stats
            .current_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bind the listener and hand it back ready to run
pub async fn connect(
    engine: &Engine,
    auth: AuthProvider,
    signal: broadcast::Sender<()>,
) -> CinResult<Listener> {
    let base = BaseListener::init(engine, auth, signal).await?;
    log::info!(
        "Server started on {}:{}",
        engine.cfg.bind,
        engine.cfg.port
    );
    Ok(Listener::new(base))
}
