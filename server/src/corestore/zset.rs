/*
 * Created on Wed Feb 14 2024
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

//! Sorted sets: member → score, ordered by (score, member lex). NaN scores
//! are rejected before they can enter the structure, which is what makes the
//! `Ord` on [`Ranked`] sound

use super::strings::resolve_range;
use super::{Coretable, Data, Entry, StoreError, StoreResult, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// One (score, member) rank entry. Total order: score first, member
/// lexicographic on ties
#[derive(Debug, Clone, PartialEq)]
struct Ranked {
    score: f64,
    member: Data,
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // scores are never NaN here
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// The sorted set structure: a score lookup map plus a rank order index,
/// kept in lockstep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Zset {
    scores: HashMap<Data, f64>,
    order: BTreeSet<Ranked>,
}

impl Zset {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.scores.len()
    }
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
    /// Insert or update a member; returns true if the member was new
    pub fn insert(&mut self, member: Data, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.order.remove(&Ranked {
                    score: old,
                    member: member.clone(),
                });
                self.order.insert(Ranked { score, member });
                false
            }
            None => {
                self.order.insert(Ranked { score, member });
                true
            }
        }
    }
    /// Remove a member; returns true if it was present
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&Ranked {
                    score,
                    member: Data::copy_from_slice(member),
                });
                true
            }
            None => false,
        }
    }
    pub fn score_of(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }
    /// Members by ascending rank over the inclusive index range
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Data, f64)> {
        match resolve_range(self.len(), start, stop) {
            Some((from, to)) => self
                .order
                .iter()
                .skip(from)
                .take(to - from + 1)
                .map(|ranked| (ranked.member.clone(), ranked.score))
                .collect(),
            None => Vec::new(),
        }
    }
    /// Remove and return up to `count` lowest-ranked members
    pub fn pop_min(&mut self, count: usize) -> Vec<(Data, f64)> {
        let mut popped = Vec::with_capacity(count.min(self.len()));
        while popped.len() < count {
            let lowest = match self.order.iter().next().cloned() {
                Some(ranked) => ranked,
                None => break,
            };
            self.order.remove(&lowest);
            self.scores.remove(&lowest.member[..]);
            popped.push((lowest.member, lowest.score));
        }
        popped
    }
    /// Iterate in rank order (used by persistence)
    pub fn iter(&self) -> impl Iterator<Item = (&Data, f64)> {
        self.order.iter().map(|ranked| (&ranked.member, ranked.score))
    }
    pub fn mem_usage(&self) -> usize {
        self.scores
            .iter()
            .map(|(member, _)| member.len() + 8 + 48)
            .sum()
    }
}

/// The capability surface for sorted set command handlers
pub trait SortedSetStore {
    /// `ZADD`: returns how many members were newly added. NaN scores never
    /// reach the structure
    fn zset_add(&mut self, key: &[u8], pairs: Vec<(f64, Data)>) -> StoreResult<usize>;
    /// `ZREM`
    fn zset_rem(&mut self, key: &[u8], members: &[Data]) -> StoreResult<usize>;
    /// `ZCARD`: 0 if absent
    fn zset_card(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `ZSCORE`
    fn zset_score(&mut self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>>;
    /// `ZRANGE` by rank, inclusive tail-relative indices
    fn zset_range(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<(Data, f64)>>;
    /// `ZPOPMIN`
    fn zset_pop_min(&mut self, key: &[u8], count: usize) -> StoreResult<Vec<(Data, f64)>>;
}

impl Coretable {
    fn zset_ref(&mut self, key: &[u8]) -> StoreResult<Option<&Zset>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => Ok(Some(zset)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn zset_mut(&mut self, key: &[u8]) -> StoreResult<Option<&mut Zset>> {
        match self.entry_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => Ok(Some(zset)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn zset_mut_or_create(&mut self, key: &[u8]) -> StoreResult<&mut Zset> {
        self.expire_if_needed(key);
        let entry = self
            .map
            .entry(Data::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Value::Zset(Zset::new())));
        match &mut entry.value {
            Value::Zset(zset) => Ok(zset),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl SortedSetStore for Coretable {
    fn zset_add(&mut self, key: &[u8], pairs: Vec<(f64, Data)>) -> StoreResult<usize> {
        if pairs.iter().any(|(score, _)| score.is_nan()) {
            return Err(StoreError::NotFloat);
        }
        let zset = self.zset_mut_or_create(key)?;
        let mut added = 0;
        for (score, member) in pairs {
            if zset.insert(member, score) {
                added += 1;
            }
        }
        self.bump_version(key);
        Ok(added)
    }
    fn zset_rem(&mut self, key: &[u8], members: &[Data]) -> StoreResult<usize> {
        let removed = match self.zset_mut(key)? {
            None => return Ok(0),
            Some(zset) => members
                .iter()
                .filter(|member| zset.remove(&member[..]))
                .count(),
        };
        if removed > 0 {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(removed)
    }
    fn zset_card(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.zset_ref(key)?.map(Zset::len).unwrap_or(0))
    }
    fn zset_score(&mut self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        Ok(self.zset_ref(key)?.and_then(|zset| zset.score_of(member)))
    }
    fn zset_range(&mut self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<(Data, f64)>> {
        Ok(self
            .zset_ref(key)?
            .map(|zset| zset.range(start, stop))
            .unwrap_or_default())
    }
    fn zset_pop_min(&mut self, key: &[u8], count: usize) -> StoreResult<Vec<(Data, f64)>> {
        let popped = match self.zset_mut(key)? {
            None => return Ok(Vec::new()),
            Some(zset) => zset.pop_min(count),
        };
        if !popped.is_empty() {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(popped)
    }
}
