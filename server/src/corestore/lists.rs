/*
 * Created on Mon Feb 12 2024
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

//! List operations. An empty list implies an absent key

use super::strings::resolve_range;
use super::{Coretable, Data, Entry, StoreError, StoreResult, Value};
use std::collections::VecDeque;

/// The capability surface for list command handlers
pub trait ListStore {
    /// `LPUSH`/`RPUSH` (`front` selects the end); returns the new length.
    /// Values are pushed one at a time, so `LPUSH k a b` yields `[b, a]`
    fn list_push(&mut self, key: &[u8], values: Vec<Data>, front: bool) -> StoreResult<usize>;
    /// `LPOP`/`RPOP`; `None` if absent. Popping the last element drops the key
    fn list_pop(&mut self, key: &[u8], front: bool) -> StoreResult<Option<Data>>;
    /// `LLEN`: 0 if absent
    fn list_len(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `LRANGE` with inclusive tail-relative indices
    fn list_range(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Data>>;
    /// `LINDEX`
    fn list_index(&mut self, key: &[u8], index: i64) -> StoreResult<Option<Data>>;
    /// `LSET`: errors on an absent key or an out-of-range index
    fn list_set(&mut self, key: &[u8], index: i64, value: Data) -> StoreResult<()>;
    /// `LREM`: count > 0 removes from the head, < 0 from the tail, 0 all
    fn list_rem(&mut self, key: &[u8], count: i64, needle: &[u8]) -> StoreResult<usize>;
    /// `LTRIM` to the inclusive range; an emptied list drops the key
    fn list_trim(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<()>;
}

impl Coretable {
    fn list_ref(&mut self, key: &[u8]) -> StoreResult<Option<&VecDeque<Data>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(Some(items)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn list_mut(&mut self, key: &[u8]) -> StoreResult<Option<&mut VecDeque<Data>>> {
        match self.entry_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(Some(items)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn list_mut_or_create(&mut self, key: &[u8]) -> StoreResult<&mut VecDeque<Data>> {
        self.expire_if_needed(key);
        let entry = self
            .map
            .entry(Data::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
        match &mut entry.value {
            Value::List(items) => Ok(items),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl ListStore for Coretable {
    fn list_push(&mut self, key: &[u8], values: Vec<Data>, front: bool) -> StoreResult<usize> {
        let items = self.list_mut_or_create(key)?;
        for value in values {
            if front {
                items.push_front(value);
            } else {
                items.push_back(value);
            }
        }
        let len = items.len();
        self.bump_version(key);
        Ok(len)
    }
    fn list_pop(&mut self, key: &[u8], front: bool) -> StoreResult<Option<Data>> {
        let popped = match self.list_mut(key)? {
            None => return Ok(None),
            Some(items) => {
                if front {
                    items.pop_front()
                } else {
                    items.pop_back()
                }
            }
        };
        if popped.is_some() {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(popped)
    }
    fn list_len(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.list_ref(key)?.map(VecDeque::len).unwrap_or(0))
    }
    fn list_range(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Data>> {
        let items = match self.list_ref(key)? {
            Some(items) => items,
            None => return Ok(Vec::new()),
        };
        match resolve_range(items.len(), start, stop) {
            Some((from, to)) => Ok(items.iter().skip(from).take(to - from + 1).cloned().collect()),
            None => Ok(Vec::new()),
        }
    }
    fn list_index(&mut self, key: &[u8], index: i64) -> StoreResult<Option<Data>> {
        let items = match self.list_ref(key)? {
            Some(items) => items,
            None => return Ok(None),
        };
        Ok(resolve_index(items.len(), index).and_then(|at| items.get(at).cloned()))
    }
    fn list_set(&mut self, key: &[u8], index: i64, value: Data) -> StoreResult<()> {
        let items = match self.list_mut(key)? {
            Some(items) => items,
            None => return Err(StoreError::NoSuchKey),
        };
        match resolve_index(items.len(), index) {
            Some(at) => {
                items[at] = value;
                self.bump_version(key);
                Ok(())
            }
            None => Err(StoreError::IndexOutOfRange),
        }
    }
    fn list_rem(&mut self, key: &[u8], count: i64, needle: &[u8]) -> StoreResult<usize> {
        let items = match self.list_mut(key)? {
            Some(items) => items,
            None => return Ok(0),
        };
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;
        if count >= 0 {
            let mut index = 0;
            while index < items.len() && removed < limit {
                if &items[index][..] == needle {
                    items.remove(index);
                    removed += 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut index = items.len();
            while index > 0 && removed < limit {
                index -= 1;
                if &items[index][..] == needle {
                    items.remove(index);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(removed)
    }
    fn list_trim(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<()> {
        let items = match self.list_mut(key)? {
            Some(items) => items,
            None => return Ok(()),
        };
        match resolve_range(items.len(), start, stop) {
            Some((from, to)) => {
                items.truncate(to + 1);
                items.drain(..from);
            }
            None => items.clear(),
        }
        self.bump_version(key);
        self.drop_if_hollow(key);
        Ok(())
    }
}

/// Resolve a possibly-negative index against a length
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if resolved < 0 || resolved >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(items: &[&str]) -> Vec<Data> {
        items.iter().map(|item| Data::from(*item)).collect()
    }

    #[test]
    fn push_pop_both_ends() {
        let mut table = Coretable::new();
        assert_eq!(table.list_push(b"l", data(&["a", "b"]), false).unwrap(), 2);
        assert_eq!(table.list_push(b"l", data(&["z"]), true).unwrap(), 3);
        assert_eq!(table.list_range(b"l", 0, -1).unwrap(), data(&["z", "a", "b"]));
        assert_eq!(table.list_pop(b"l", true).unwrap(), Some("z".into()));
        assert_eq!(table.list_pop(b"l", false).unwrap(), Some("b".into()));
    }

    #[test]
    fn lpush_reverses_argument_order() {
        let mut table = Coretable::new();
        table.list_push(b"l", data(&["a", "b", "c"]), true).unwrap();
        assert_eq!(table.list_range(b"l", 0, -1).unwrap(), data(&["c", "b", "a"]));
    }

    #[test]
    fn popping_the_last_element_drops_the_key() {
        let mut table = Coretable::new();
        table.list_push(b"l", data(&["only"]), false).unwrap();
        assert_eq!(table.list_pop(b"l", true).unwrap(), Some("only".into()));
        use crate::corestore::keyspace::KeyspaceStore;
        assert!(!table.key_exists(b"l"));
        assert_eq!(table.list_pop(b"l", true).unwrap(), None);
    }

    #[test]
    fn lindex_and_negative_indices() {
        let mut table = Coretable::new();
        table.list_push(b"l", data(&["a", "b", "c"]), false).unwrap();
        assert_eq!(table.list_index(b"l", 0).unwrap(), Some("a".into()));
        assert_eq!(table.list_index(b"l", -1).unwrap(), Some("c".into()));
        assert_eq!(table.list_index(b"l", 5).unwrap(), None);
    }

    #[test]
    fn lset_errors() {
        let mut table = Coretable::new();
        assert_eq!(
            table.list_set(b"missing", 0, "x".into()),
            Err(StoreError::NoSuchKey)
        );
        table.list_push(b"l", data(&["a"]), false).unwrap();
        assert_eq!(
            table.list_set(b"l", 3, "x".into()),
            Err(StoreError::IndexOutOfRange)
        );
        table.list_set(b"l", 0, "x".into()).unwrap();
        assert_eq!(table.list_index(b"l", 0).unwrap(), Some("x".into()));
    }

    #[test]
    fn lrem_directions() {
        let mut table = Coretable::new();
        table
            .list_push(b"l", data(&["x", "a", "x", "b", "x"]), false)
            .unwrap();
        assert_eq!(table.list_rem(b"l", 2, b"x").unwrap(), 2);
        assert_eq!(table.list_range(b"l", 0, -1).unwrap(), data(&["a", "b", "x"]));
        table.list_push(b"l", data(&["x"]), false).unwrap();
        assert_eq!(table.list_rem(b"l", -1, b"x").unwrap(), 1);
        assert_eq!(table.list_range(b"l", 0, -1).unwrap(), data(&["a", "b", "x"]));
        assert_eq!(table.list_rem(b"l", 0, b"x").unwrap(), 1);
    }

    #[test]
    fn ltrim_keeps_the_window() {
        let mut table = Coretable::new();
        table
            .list_push(b"l", data(&["a", "b", "c", "d", "e"]), false)
            .unwrap();
        table.list_trim(b"l", 1, 3).unwrap();
        assert_eq!(table.list_range(b"l", 0, -1).unwrap(), data(&["b", "c", "d"]));
        // an out-of-range window empties (and thus drops) the list
        table.list_trim(b"l", 5, 10).unwrap();
        use crate::corestore::keyspace::KeyspaceStore;
        assert!(!table.key_exists(b"l"));
    }

    #[test]
    fn wrong_type_guard() {
        let mut table = Coretable::new();
        use crate::corestore::strings::StringStore;
        table.set_string("s".into(), "v".into(), None);
        assert_eq!(
            table.list_push(b"s", data(&["a"]), false),
            Err(StoreError::WrongType)
        );
        assert_eq!(table.list_len(b"s"), Err(StoreError::WrongType));
    }
}
