/*
 * Created on Tue Mar 05 2024
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

//! The replica side of the link: connect, handshake, swallow the snapshot,
//! then apply the command stream forever. Applied commands never touch the
//! replica's own AOF

use crate::diskstore;
use crate::protocol::{encoder, Command, Frame, ParseError, Parser};
use crate::queryengine::Engine;
use crate::util::error::{CinResult, Error};
use bytes::{Buf, Bytes, BytesMut};
use libcinnabar::BUF_CAP;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

/// How long to wait between reconnect attempts
const RECONNECT_EVERY: Duration = Duration::from_secs(2);

/// A framed reader/writer over the link to the primary
struct ReplStream {
    stream: TcpStream,
    buffer: BytesMut,
}

impl ReplStream {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(BUF_CAP),
        }
    }
    /// Read exactly one frame; `None` on a clean close. The byte count is
    /// reported so the applied offset can advance precisely
    async fn read_frame(&mut self) -> CinResult<Option<(Frame, usize)>> {
        loop {
            if !self.buffer.is_empty() {
                match Parser::parse(&self.buffer) {
                    Ok((frame, advance)) => {
                        self.buffer.advance(advance);
                        return Ok(Some((frame, advance)));
                    }
                    Err(ParseError::NotEnough) => {}
                    Err(e) => {
                        return Err(Error::other(format!(
                            "primary sent an unparseable frame: {e:?}"
                        )))
                    }
                }
            }
            let read = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| Error::ioerror_extra(e, "reading from the primary"))?;
            if read == 0 {
                return Ok(None);
            }
        }
    }
    async fn send_command(&mut self, parts: &[&[u8]]) -> CinResult<()> {
        let parts: Vec<Bytes> = parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part))
            .collect();
        self.stream
            .write_all(&encoder::encode_command_parts(&parts))
            .await
            .map_err(|e| Error::ioerror_extra(e, "writing to the primary"))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::ioerror_extra(e, "flushing to the primary"))?;
        Ok(())
    }
    async fn expect_ok(&mut self) -> CinResult<()> {
        match self.read_frame().await? {
            Some((Frame::Simple(s), _)) if s == "OK" => Ok(()),
            Some((other, _)) => Err(Error::other(format!(
                "primary rejected the handshake: {other:?}"
            ))),
            None => Err(Error::other("primary closed the link mid-handshake")),
        }
    }
}

/// The long-lived replica task: keeps the link up until shutdown
pub async fn run_replica(
    engine: Engine,
    host: String,
    port: u16,
    mut terminator: crate::dbnet::Terminator,
) {
    log::info!("Replicating from {host}:{port}");
    loop {
        if terminator.is_termination_signal() {
            break;
        }
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                engine.repl.set_link(true);
                let outcome = tokio::select! {
                    outcome = sync_with_primary(&engine, stream) => outcome,
                    _ = terminator.receive_signal() => {
                        engine.repl.set_link(false);
                        break;
                    }
                };
                engine.repl.set_link(false);
                if let Err(e) = outcome {
                    log::warn!("Replication link failed: {}; reconnecting", e);
                }
            }
            Err(e) => {
                log::warn!("Cannot reach the primary at {host}:{port}: {e}");
            }
        }
        tokio::select! {
            _ = time::sleep(RECONNECT_EVERY) => {}
            _ = terminator.receive_signal() => break,
        }
    }
    log::info!("Replication link task has exited");
}

/// One full session: handshake, snapshot, stream
async fn sync_with_primary(engine: &Engine, stream: TcpStream) -> CinResult<()> {
    let mut link = ReplStream::new(stream);
    // 1: announce ourselves
    link.send_command(&[
        b"REPLCONF",
        b"listening-port",
        engine.cfg.port.to_string().as_bytes(),
    ])
    .await?;
    link.expect_ok().await?;
    // 2: request a sync with an unknown replication id
    link.send_command(&[b"PSYNC", b"?", b"-1"]).await?;
    let baseline = match link.read_frame().await? {
        Some((Frame::Simple(header), _)) if header.starts_with("FULLRESYNC") => header
            .rsplit(' ')
            .next()
            .and_then(|raw| raw.parse::<u64>().ok())
            .ok_or_else(|| Error::other(format!("bad FULLRESYNC header '{header}'")))?,
        Some((other, _)) => {
            return Err(Error::other(format!("expected FULLRESYNC, got {other:?}")))
        }
        None => return Err(Error::other("primary closed the link before FULLRESYNC")),
    };
    // 3: the snapshot payload replaces our entire dataset
    let image = match link.read_frame().await? {
        Some((Frame::Bulk(image), _)) => image,
        Some((other, _)) => {
            return Err(Error::other(format!(
                "expected the snapshot bulk, got {other:?}"
            )))
        }
        None => return Err(Error::other("primary closed the link before the snapshot")),
    };
    {
        let mut table = engine.store.write();
        diskstore::deserialize_into(&image, &mut table)?;
        log::info!("Full resync complete: {} keys", table.raw_len());
    }
    engine.repl.set_offset(baseline);
    // 4: apply the stream for as long as the link lives
    loop {
        match link.read_frame().await? {
            Some((frame, consumed)) => {
                match Command::from_frame(frame) {
                    Ok(Some(cmd)) => engine.apply_replicated(&cmd),
                    Ok(None) => {}
                    Err(what) => {
                        return Err(Error::other(format!(
                            "primary streamed a non-command frame: {what}"
                        )))
                    }
                }
                engine.repl.advance_offset(consumed as u64);
            }
            None => return Err(Error::other("primary closed the link")),
        }
    }
}
