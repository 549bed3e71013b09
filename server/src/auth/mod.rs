/*
 * Created on Tue Feb 27 2024
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

//! Authentication: a single optional shared secret, compared byte-for-byte.
//! When no password is configured every connection is born authenticated

/// The password checker shared by every connection
#[derive(Debug, Clone, Default)]
pub struct AuthProvider {
    password: Option<Vec<u8>>,
}

impl AuthProvider {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.map(String::into_bytes),
        }
    }
    pub fn is_enabled(&self) -> bool {
        self.password.is_some()
    }
    /// Byte-for-byte comparison against the configured secret
    pub fn check(&self, attempt: &[u8]) -> bool {
        matches!(&self.password, Some(secret) if secret.as_slice() == attempt)
    }
}

/// Per-connection authentication state: the provider plus whether this
/// connection has passed AUTH yet
#[derive(Debug)]
pub struct AuthHandle {
    provider: AuthProvider,
    auth_good: bool,
}

impl AuthHandle {
    pub fn new(provider: AuthProvider) -> Self {
        // with auth disabled, connections start out authenticated
        let auth_good = !provider.is_enabled();
        Self {
            provider,
            auth_good,
        }
    }
    pub const fn authenticated(&self) -> bool {
        self.auth_good
    }
    pub fn provider(&self) -> &AuthProvider {
        &self.provider
    }
    pub fn set_auth(&mut self) {
        self.auth_good = true;
    }
}
