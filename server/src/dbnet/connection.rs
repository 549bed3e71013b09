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

//! A buffered client connection: a read buffer the pipeline parser works
//! over and a write-buffered stream flushed once per batch

use crate::protocol::{self, encoder, Frame, ParseError};
use crate::IoResult;
use bytes::{Buf, BytesMut};
use libcinnabar::BUF_CAP;
use std::io::{Error as IoError, ErrorKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// What one read attempt produced
pub enum BatchResult {
    /// One or more complete frames, in arrival order
    Frames(Vec<Frame>),
    /// The peer closed the connection cleanly
    Disconnected,
    /// The peer sent bytes that violate the protocol; the connection must
    /// be closed after an error reply
    Protocol(ParseError),
}

pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    scratch: Vec<u8>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(BUF_CAP),
            scratch: Vec::with_capacity(BUF_CAP),
        }
    }
    /// Read until at least one complete frame is buffered, then hand back
    /// everything that is already complete — the pipelined batch. A partial
    /// trailing frame stays in the buffer for the next call
    pub async fn read_batch(&mut self) -> IoResult<BatchResult> {
        loop {
            if !self.buffer.is_empty() {
                match protocol::parse_pipeline(&self.buffer) {
                    Ok((frames, consumed)) => {
                        if !frames.is_empty() {
                            self.buffer.advance(consumed);
                            return Ok(BatchResult::Frames(frames));
                        }
                    }
                    Err(e) => return Ok(BatchResult::Protocol(e)),
                }
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(BatchResult::Disconnected)
                } else {
                    Err(IoError::from(ErrorKind::ConnectionReset))
                };
            }
        }
    }
    /// Queue a reply frame on the buffered writer
    pub async fn write_frame(&mut self, frame: &Frame) -> IoResult<()> {
        self.scratch.clear();
        encoder::encode(frame, &mut self.scratch);
        self.stream.write_all(&self.scratch).await
    }
    /// Queue an error reply
    pub async fn write_error(&mut self, message: &str) -> IoResult<()> {
        self.write_frame(&Frame::Error(message.to_owned())).await
    }
    /// Queue pre-encoded bytes (replication stream, FULLRESYNC header)
    pub async fn write_raw(&mut self, raw: &[u8]) -> IoResult<()> {
        self.stream.write_all(raw).await
    }
    /// Flush the batch. Called once per pipeline to amortize syscalls
    pub async fn flush(&mut self) -> IoResult<()> {
        self.stream.flush().await
    }
}
