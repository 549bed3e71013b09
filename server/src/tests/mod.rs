/*
 * Created on Tue Mar 12 2024
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

//! Integration tests over real TCP: everything here talks to a listener the
//! way a client (or a replica) would

use crate::auth::AuthProvider;
use crate::config::ConfigurationSet;
use crate::dbnet::{self, BaseListener, Listener};
use crate::protocol::{encoder, Frame, ParseError, Parser};
use crate::queryengine::Engine;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;

fn unique_dir(tag: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    std::env::temp_dir()
        .join(format!(
            "cinnabar-net-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ))
        .to_string_lossy()
        .into_owned()
}

fn test_cfg(tag: &str) -> ConfigurationSet {
    ConfigurationSet {
        // port 0 asks the OS for an ephemeral port
        port: 0,
        dir: unique_dir(tag),
        save: 0,
        ..ConfigurationSet::default()
    }
}

/// Bring up an engine and a listener on an ephemeral port. The shutdown
/// sender is returned so tests can drain the server when done
async fn spawn_server(cfg: ConfigurationSet) -> (Engine, std::net::SocketAddr, broadcast::Sender<()>) {
    let engine = Engine::init(cfg).unwrap();
    let auth = AuthProvider::new(engine.cfg.requirepass.clone());
    let (signal, _) = broadcast::channel::<()>(1);
    let base = BaseListener::init(&engine, auth, signal.clone()).await.unwrap();
    let addr = base.listener.local_addr().unwrap();
    let mut listener = Listener::new(base);
    tokio::spawn(async move {
        let _ = listener.run().await;
    });
    (engine, addr, signal)
}

/// A minimal RESP client for the tests
struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buffer: BytesMut::new(),
        }
    }
    async fn send(&mut self, parts: &[&str]) {
        let parts: Vec<Bytes> = parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect();
        self.stream
            .write_all(&encoder::encode_command_parts(&parts))
            .await
            .unwrap();
    }
    async fn send_raw(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.unwrap();
    }
    /// Read one reply frame; `None` when the server closed the connection
    async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.buffer.is_empty() {
                match Parser::parse(&self.buffer) {
                    Ok((frame, advance)) => {
                        self.buffer.advance(advance);
                        return Some(frame);
                    }
                    Err(ParseError::NotEnough) => {}
                    Err(e) => panic!("server sent an unparseable reply: {e:?}"),
                }
            }
            if self.stream.read_buf(&mut self.buffer).await.unwrap() == 0 {
                return None;
            }
        }
    }
    async fn roundtrip(&mut self, parts: &[&str]) -> Frame {
        self.send(parts).await;
        self.read_frame().await.expect("server closed unexpectedly")
    }
}

#[tokio::test]
async fn ping_echo_over_tcp() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("ping")).await;
    let mut client = TestClient::connect(addr).await;
    assert_eq!(
        client.roundtrip(&["PING"]).await,
        Frame::Simple("PONG".to_owned())
    );
    assert_eq!(
        client.roundtrip(&["ECHO", "hello"]).await,
        Frame::bulk(b"hello")
    );
}

#[tokio::test]
async fn pipelined_replies_arrive_in_request_order() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("pipeline")).await;
    let mut client = TestClient::connect(addr).await;
    // one write carrying three commands
    let mut batch = Vec::new();
    for parts in [
        vec!["SET", "k", "v"],
        vec!["GET", "k"],
        vec!["DEL", "k"],
    ] {
        let parts: Vec<Bytes> = parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect();
        batch.extend_from_slice(&encoder::encode_command_parts(&parts));
    }
    client.send_raw(&batch).await;
    assert_eq!(client.read_frame().await.unwrap(), Frame::ok());
    assert_eq!(client.read_frame().await.unwrap(), Frame::bulk(b"v"));
    assert_eq!(client.read_frame().await.unwrap(), Frame::Integer(1));
}

#[tokio::test]
async fn inline_commands_work_over_tcp() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("inline")).await;
    let mut client = TestClient::connect(addr).await;
    client.send_raw(b"SET inlinekey inlineval\r\n").await;
    assert_eq!(client.read_frame().await.unwrap(), Frame::ok());
    // telnet-style: a bare LF is accepted for inline commands
    client.send_raw(b"GET inlinekey\n").await;
    assert_eq!(
        client.read_frame().await.unwrap(),
        Frame::bulk(b"inlineval")
    );
}

#[tokio::test]
async fn auth_gate_blocks_until_authenticated() {
    let mut cfg = test_cfg("auth");
    cfg.requirepass = Some("sekrit".to_owned());
    let (_engine, addr, _signal) = spawn_server(cfg).await;
    let mut client = TestClient::connect(addr).await;
    assert_eq!(
        client.roundtrip(&["PING"]).await,
        Frame::Error("NOAUTH Authentication required.".to_owned())
    );
    assert_eq!(
        client.roundtrip(&["AUTH", "wrong"]).await,
        Frame::Error("ERR invalid password".to_owned())
    );
    assert_eq!(client.roundtrip(&["AUTH", "sekrit"]).await, Frame::ok());
    assert_eq!(
        client.roundtrip(&["PING"]).await,
        Frame::Simple("PONG".to_owned())
    );
}

#[tokio::test]
async fn auth_against_passwordless_server_is_an_error() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("noauth")).await;
    let mut client = TestClient::connect(addr).await;
    assert_eq!(
        client.roundtrip(&["AUTH", "whatever"]).await,
        Frame::Error("ERR Client sent AUTH, but no password is set".to_owned())
    );
}

#[tokio::test]
async fn watch_across_connections_aborts_exec() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("netwatch")).await;
    let mut watcher = TestClient::connect(addr).await;
    let mut writer = TestClient::connect(addr).await;
    assert_eq!(watcher.roundtrip(&["SET", "x", "0"]).await, Frame::ok());
    assert_eq!(watcher.roundtrip(&["WATCH", "x"]).await, Frame::ok());
    assert_eq!(writer.roundtrip(&["SET", "x", "1"]).await, Frame::ok());
    assert_eq!(watcher.roundtrip(&["MULTI"]).await, Frame::ok());
    assert_eq!(
        watcher.roundtrip(&["SET", "x", "2"]).await,
        Frame::Simple("QUEUED".to_owned())
    );
    assert_eq!(watcher.roundtrip(&["EXEC"]).await, Frame::NullArray);
    assert_eq!(watcher.roundtrip(&["GET", "x"]).await, Frame::bulk(b"1"));
}

#[tokio::test]
async fn transactions_are_isolated_per_connection() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("txniso")).await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;
    assert_eq!(a.roundtrip(&["MULTI"]).await, Frame::ok());
    // connection B is not inside A's transaction
    assert_eq!(b.roundtrip(&["SET", "k", "v"]).await, Frame::ok());
    assert_eq!(
        a.roundtrip(&["SET", "k", "queued"]).await,
        Frame::Simple("QUEUED".to_owned())
    );
    // B's EXEC fails: it never opened MULTI
    assert_eq!(
        b.roundtrip(&["EXEC"]).await,
        Frame::Error("ERR EXEC without MULTI".to_owned())
    );
    assert_eq!(
        a.roundtrip(&["EXEC"]).await,
        Frame::Array(vec![Frame::ok()])
    );
}

#[tokio::test]
async fn protocol_violation_closes_the_connection() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("protoerr")).await;
    let mut client = TestClient::connect(addr).await;
    client.send_raw(b"*1\r\n%3\r\nabc\r\n").await;
    match client.read_frame().await {
        Some(Frame::Error(message)) => assert!(message.starts_with("ERR Protocol error")),
        other => panic!("unexpected reply: {other:?}"),
    }
    // the server hangs up after the error
    assert_eq!(client.read_frame().await, None);
}

#[tokio::test]
async fn idle_timeout_closes_the_connection() {
    let mut cfg = test_cfg("idle");
    cfg.timeout = 1;
    let (_engine, addr, _signal) = spawn_server(cfg).await;
    let mut client = TestClient::connect(addr).await;
    assert_eq!(
        client.roundtrip(&["PING"]).await,
        Frame::Simple("PONG".to_owned())
    );
    time::sleep(Duration::from_millis(1500)).await;
    // the next read observes the server-side close
    assert_eq!(client.read_frame().await, None);
}

#[tokio::test]
async fn psync_handshake_ships_snapshot_then_stream() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("psync")).await;
    let mut writer = TestClient::connect(addr).await;
    assert_eq!(
        writer.roundtrip(&["SET", "seeded", "1"]).await,
        Frame::ok()
    );
    let mut replica = TestClient::connect(addr).await;
    assert_eq!(
        replica
            .roundtrip(&["REPLCONF", "listening-port", "7777"])
            .await,
        Frame::ok()
    );
    replica.send(&["PSYNC", "?", "-1"]).await;
    // 1: the FULLRESYNC header
    match replica.read_frame().await.unwrap() {
        Frame::Simple(header) => {
            assert!(header.starts_with("FULLRESYNC "));
            assert_eq!(header.split(' ').count(), 3);
        }
        other => panic!("expected FULLRESYNC, got {other:?}"),
    }
    // 2: the snapshot bulk holds the seeded dataset
    match replica.read_frame().await.unwrap() {
        Frame::Bulk(image) => {
            let mut restored = crate::corestore::Coretable::new();
            crate::diskstore::deserialize_into(&image, &mut restored).unwrap();
            assert_eq!(restored.raw_len(), 1);
        }
        other => panic!("expected the snapshot bulk, got {other:?}"),
    }
    // 3: subsequent writes arrive as command arrays on the same connection
    assert_eq!(writer.roundtrip(&["SET", "live", "2"]).await, Frame::ok());
    match replica.read_frame().await.unwrap() {
        Frame::Array(items) => {
            assert_eq!(items[0], Frame::bulk(b"SET"));
            assert_eq!(items[1], Frame::bulk(b"live"));
        }
        other => panic!("expected a streamed command, got {other:?}"),
    }
    // FLUSHDB is relayed too
    assert_eq!(writer.roundtrip(&["FLUSHDB"]).await, Frame::ok());
    match replica.read_frame().await.unwrap() {
        Frame::Array(items) => assert_eq!(items[0], Frame::bulk(b"FLUSHDB")),
        other => panic!("expected FLUSHDB, got {other:?}"),
    }
}

#[tokio::test]
async fn legacy_sync_is_accepted() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("sync")).await;
    let mut replica = TestClient::connect(addr).await;
    replica.send(&["SYNC"]).await;
    match replica.read_frame().await.unwrap() {
        Frame::Simple(header) => assert!(header.starts_with("FULLRESYNC ")),
        other => panic!("expected FULLRESYNC, got {other:?}"),
    }
    assert!(matches!(
        replica.read_frame().await.unwrap(),
        Frame::Bulk(_)
    ));
}

#[tokio::test]
async fn replica_task_follows_the_primary() {
    let (primary, addr, signal) = spawn_server(test_cfg("chain-primary")).await;
    let mut writer = TestClient::connect(addr).await;
    assert_eq!(
        writer.roundtrip(&["SET", "before", "1"]).await,
        Frame::ok()
    );
    // a replica engine following the primary over a real socket
    let replica_cfg = ConfigurationSet {
        replicaof: Some(format!("{} {}", addr.ip(), addr.port())),
        ..test_cfg("chain-replica")
    };
    let replica = Engine::init(replica_cfg).unwrap();
    assert!(replica.repl.is_replica());
    tokio::spawn(crate::replication::replica::run_replica(
        replica.clone(),
        addr.ip().to_string(),
        addr.port(),
        crate::dbnet::Terminator::new(signal.subscribe()),
    ));
    // the snapshot brings over the pre-existing key
    wait_for_key(&replica, b"before").await;
    // live writes flow through the stream
    assert_eq!(writer.roundtrip(&["SET", "after", "2"]).await, Frame::ok());
    wait_for_key(&replica, b"after").await;
    // the replica reports its role and link
    let mut txn = crate::txn::TxnState::new();
    match replica.execute(&mut txn, command(&["ROLE"])) {
        Frame::Array(items) => assert_eq!(items[0], Frame::bulk(b"slave")),
        other => panic!("unexpected ROLE reply: {other:?}"),
    }
    assert!(replica.repl.link_up());
    let _ = signal.send(());
}

fn command(parts: &[&str]) -> crate::protocol::Command {
    crate::protocol::Command::from_parts(
        parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect(),
    )
    .unwrap()
}

async fn wait_for_key(engine: &Engine, key: &[u8]) {
    use crate::corestore::keyspace::KeyspaceStore;
    for _ in 0..200 {
        if engine.store.write().key_exists(key) {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("key {:?} never replicated", String::from_utf8_lossy(key));
}

#[tokio::test]
async fn wrongtype_and_error_strings_over_the_wire() {
    let (_engine, addr, _signal) = spawn_server(test_cfg("errors")).await;
    let mut client = TestClient::connect(addr).await;
    assert_eq!(
        client.roundtrip(&["LPUSH", "l", "a"]).await,
        Frame::Integer(1)
    );
    assert_eq!(
        client.roundtrip(&["GET", "l"]).await,
        Frame::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_owned()
        )
    );
    assert_eq!(
        client.roundtrip(&["RENAME", "ghost", "x"]).await,
        Frame::Error("ERR no such key".to_owned())
    );
    assert_eq!(
        client.roundtrip(&["INCRBY", "n", "notanint"]).await,
        Frame::Error("ERR value is not an integer or out of range".to_owned())
    );
}

#[tokio::test]
async fn dbnet_connect_logs_and_binds() {
    let cfg = test_cfg("connect");
    let engine = Engine::init(cfg).unwrap();
    let (signal, _) = broadcast::channel::<()>(1);
    let listener = dbnet::connect(&engine, AuthProvider::new(None), signal)
        .await
        .unwrap();
    assert!(listener.base.listener.local_addr().is_ok());
}
