/*
 * Created on Wed Feb 07 2024
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

//! The deliberately small glob dialect used by `KEYS` and `SCAN MATCH`.
//!
//! Only four shapes exist: exact match, `prefix*`, `*suffix` and `*middle*`.
//! `?`, character classes and escapes are not part of the dialect; a pattern
//! containing them only ever matches itself literally.

/// Match a key against a pattern
pub fn matches(pattern: &[u8], key: &[u8]) -> bool {
    match (
        pattern.first() == Some(&b'*'),
        pattern.len() > 1 && pattern.last() == Some(&b'*'),
    ) {
        // "*middle*" (and bare "*", which contains everything)
        (true, true) => contains(key, &pattern[1..pattern.len() - 1]),
        // "*suffix"
        (true, false) => {
            if pattern.len() == 1 {
                // bare "*"
                true
            } else {
                key.ends_with(&pattern[1..])
            }
        }
        // "prefix*"
        (false, true) => key.starts_with(&pattern[..pattern.len() - 1]),
        // exact
        (false, false) => pattern == key,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn exact() {
        assert!(matches(b"user:1", b"user:1"));
        assert!(!matches(b"user:1", b"user:2"));
    }

    #[test]
    fn prefix() {
        assert!(matches(b"user:*", b"user:1"));
        assert!(matches(b"user:*", b"user:"));
        assert!(!matches(b"user:*", b"session:1"));
    }

    #[test]
    fn suffix() {
        assert!(matches(b"*:1", b"user:1"));
        assert!(!matches(b"*:1", b"user:10"));
    }

    #[test]
    fn middle() {
        assert!(matches(b"*ser*", b"user:1"));
        assert!(!matches(b"*xyz*", b"user:1"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches(b"*", b""));
        assert!(matches(b"*", b"anything"));
    }

    #[test]
    fn question_mark_is_literal() {
        assert!(!matches(b"user:?", b"user:1"));
        assert!(matches(b"user:?", b"user:?"));
    }
}
