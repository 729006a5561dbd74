//! In-process counter store.
//!
//! Mirrors the Redis semantics the limiters rely on, including storing values
//! as text. Only suitable for a single replica, since nothing is shared across
//! processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{parse_counter, CounterStore, Take};
use crate::error::{Result, SluiceError};

#[derive(Debug, Clone)]
enum Slot {
    Scalar(String),
    Hash(HashMap<String, String>),
}

/// Counter store held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    online: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming unreachable (`false`) or recovering.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Raw text of a scalar key, if present.
    pub fn value(&self, key: &str) -> Option<String> {
        match self.slots.get(key).as_deref() {
            Some(Slot::Scalar(raw)) => Some(raw.clone()),
            _ => None,
        }
    }

    /// Overwrite a scalar key with arbitrary text.
    pub fn set_raw(&self, key: &str, raw: &str) {
        self.slots
            .insert(key.to_string(), Slot::Scalar(raw.to_string()));
    }

    /// Copy of every field of a hash key.
    pub fn hash(&self, key: &str) -> HashMap<String, String> {
        match self.slots.get(key).as_deref() {
            Some(Slot::Hash(fields)) => fields.clone(),
            _ => HashMap::new(),
        }
    }

    /// Overwrite a hash field with arbitrary text.
    pub fn hset_raw(&self, key: &str, field: &str, raw: &str) {
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        if let Slot::Hash(fields) = slot.value_mut() {
            fields.insert(field.to_string(), raw.to_string());
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SluiceError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    /// Apply `update` to the scalar at `key` under the shard lock.
    fn with_scalar<T>(&self, key: &str, update: impl FnOnce(i64) -> (Option<i64>, T)) -> Result<T> {
        match self.slots.get_mut(key) {
            None => Err(SluiceError::MissingCounter(key.to_string())),
            Some(mut slot) => match slot.value_mut() {
                Slot::Hash(_) => Err(wrong_type(key)),
                Slot::Scalar(raw) => {
                    let current = parse_counter(key, raw)?;
                    let (next, out) = update(current);
                    if let Some(next) = next {
                        *raw = next.to_string();
                    }
                    Ok(out)
                }
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> SluiceError {
    SluiceError::StoreUnavailable(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool> {
        self.ensure_online()?;
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Scalar(value.to_string()));
                Ok(true)
            }
        }
    }

    async fn take_if_positive(&self, key: &str) -> Result<Take> {
        self.ensure_online()?;
        self.with_scalar(key, |current| {
            if current > 0 {
                (
                    Some(current - 1),
                    Take {
                        observed: current,
                        taken: true,
                    },
                )
            } else {
                (
                    None,
                    Take {
                        observed: current,
                        taken: false,
                    },
                )
            }
        })
    }

    async fn restore_if_below(&self, key: &str, ceiling: i64) -> Result<Option<i64>> {
        self.ensure_online()?;
        self.with_scalar(key, |current| {
            if current < ceiling {
                (Some(current + 1), Some(current + 1))
            } else {
                (None, None)
            }
        })
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.ensure_online()?;
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        match slot.value_mut() {
            Slot::Scalar(_) => Err(wrong_type(key)),
            Slot::Hash(fields) => {
                let raw = fields.entry(field.to_string()).or_insert_with(|| "0".to_string());
                let next = parse_counter(key, raw)? + delta;
                *raw = next.to_string();
                Ok(next)
            }
        }
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.ensure_online()?;
        match self.slots.get(key).as_deref() {
            None => Ok(Vec::new()),
            Some(Slot::Scalar(_)) => Err(wrong_type(key)),
            Some(Slot::Hash(fields)) => Ok(fields
                .iter()
                .map(|(field, raw)| (field.clone(), raw.clone()))
                .collect()),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        self.ensure_online()?;
        if let Entry::Occupied(mut occupied) = self.slots.entry(key.to_string()) {
            let drained = match occupied.get_mut() {
                Slot::Scalar(_) => return Err(wrong_type(key)),
                Slot::Hash(fields) => {
                    fields.remove(field);
                    fields.is_empty()
                }
            };
            if drained {
                occupied.remove();
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_online()
    }
}
