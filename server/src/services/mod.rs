/*
 * Created on Fri Mar 08 2024
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

//! Background services: the periodic snapshot (the `save` schedule) and the
//! expiry sweeper that reaps keys nobody touches

use crate::corestore::Corestore;
use crate::dbnet::Terminator;
use crate::queryengine::Engine;
use tokio::time::{self, Duration};

/// How often the sweeper looks for lapsed keys
const SWEEP_EVERY: Duration = Duration::from_secs(1);

/// The BGSAVE scheduler: snapshots the dataset every `every_secs` seconds
/// on a blocking worker, until the termination signal arrives. A zero
/// interval disables the service
pub async fn bgsave_scheduler(engine: Engine, every_secs: u64, mut terminator: Terminator) {
    if every_secs == 0 {
        log::info!("BGSAVE scheduler is disabled");
        return;
    }
    let every = Duration::from_secs(every_secs);
    loop {
        tokio::select! {
            _ = time::sleep_until(time::Instant::now() + every) => {
                let worker_engine = engine.clone();
                // snapshotting does disk I/O; keep it off the async workers
                let outcome = tokio::task::spawn_blocking(move || {
                    let table = worker_engine.store.read();
                    worker_engine.persist.save_rdb(&table)
                })
                .await;
                match outcome {
                    Ok(Ok(())) => log::trace!("Scheduled BGSAVE completed"),
                    Ok(Err(e)) => log::error!("Scheduled BGSAVE failed: '{}'", e),
                    Err(e) => log::error!("BGSAVE worker panicked: {}", e),
                }
            }
            _ = terminator.receive_signal() => break,
        }
    }
    log::info!("BGSAVE service has exited");
}

/// The expiry sweeper. Lazy expiration already hides lapsed keys from every
/// observer; this pass exists so untouched keys release their memory too.
/// Reaping bumps key versions, keeping WATCH semantics intact
pub async fn expiry_sweeper(store: Corestore, mut terminator: Terminator) {
    loop {
        tokio::select! {
            _ = time::sleep(SWEEP_EVERY) => {
                let reaped = store.write().reap_all_expired();
                if reaped > 0 {
                    log::trace!("Expiry sweep reaped {} keys", reaped);
                }
            }
            _ = terminator.receive_signal() => break,
        }
    }
    log::info!("Expiry sweeper has exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::now_millis;
    use crate::corestore::strings::StringStore;
    use tokio::sync::broadcast;

    #[tokio::test(start_paused = true)]
    async fn sweeper_reaps_and_stops_on_signal() {
        let store = Corestore::new();
        {
            let mut table = store.write();
            table.set_string("dead".into(), "v".into(), Some(now_millis().saturating_sub(5)));
            table.set_string("alive".into(), "v".into(), None);
        }
        let (signal, _) = broadcast::channel(1);
        let sweeper = tokio::spawn(expiry_sweeper(
            store.clone(),
            Terminator::new(signal.subscribe()),
        ));
        // let the first sweep tick fire
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.write().raw_len(), 1);
        signal.send(()).unwrap();
        sweeper.await.unwrap();
    }
}
