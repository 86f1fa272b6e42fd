use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    concurrent::{CancelToken, ChannelValue},
    errors::{ExcKind, RunError, RunResult},
    types::{array::ArrayValue, range::Range},
    value::{ListRef, MapRef, Pair, Value},
};

/// Shared iterator handle returned by the `iterator` protocol.
///
/// The `hasNext`/`next` contract needs one element of lookahead (`hasNext`
/// must not consume), so the handle buffers a peeked element. The lock makes
/// the handle safe to pass across tasks, though iteration order is then
/// whatever the interleaving produces.
#[derive(Debug)]
pub struct IterValue {
    inner: Mutex<IterState>,
}

#[derive(Debug)]
struct IterState {
    iter: ValueIter,
    peeked: Option<Value>,
}

impl IterValue {
    pub fn new(iter: ValueIter) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(IterState { iter, peeked: None }),
        })
    }

    /// `hasNext`: peeks one element without consuming it.
    pub fn has_next(&self, cancel: &CancelToken) -> RunResult<bool> {
        let mut state = self.inner.lock();
        if state.peeked.is_some() {
            return Ok(true);
        }
        match state.iter.advance(cancel)? {
            Some(v) => {
                state.peeked = Some(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `next`: returns the peeked element or advances.
    pub fn next(&self, cancel: &CancelToken) -> RunResult<Value> {
        let mut state = self.inner.lock();
        if let Some(v) = state.peeked.take() {
            return Ok(v);
        }
        state
            .iter
            .advance(cancel)?
            .ok_or_else(|| RunError::exc(ExcKind::IndexOutOfBounds, "iterator exhausted"))
    }
}

/// Concrete iteration state for every iterable value kind.
#[derive(Debug)]
pub enum ValueIter {
    Range { next: i64, remaining: i64, step: i64 },
    List { list: ListRef, idx: usize },
    Array { arr: Arc<ArrayValue>, idx: usize },
    /// Yields map entries as `Pair(key, value)` in insertion order.
    MapEntries { map: MapRef, idx: usize },
    Chars { chars: Vec<char>, idx: usize },
    /// Drains a channel until it is closed and empty.
    Channel { ch: Arc<ChannelValue>, done: bool },
    /// Pre-materialized elements.
    Values(std::vec::IntoIter<Value>),
}

impl ValueIter {
    pub fn of_range(range: Range) -> Self {
        let (next, remaining, step) = range.iter_state();
        Self::Range { next, remaining, step }
    }

    pub fn of_str(s: &str) -> Self {
        Self::Chars {
            chars: s.chars().collect(),
            idx: 0,
        }
    }

    /// Produces the next element, or `None` when exhausted.
    pub fn advance(&mut self, cancel: &CancelToken) -> RunResult<Option<Value>> {
        match self {
            Self::Range { next, remaining, step } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let value = *next;
                *next = next.wrapping_add(*step);
                *remaining -= 1;
                Ok(Some(Value::Int(value)))
            }
            Self::List { list, idx } => {
                let guard = list.read();
                match guard.get(*idx) {
                    Some(v) => {
                        let v = v.clone();
                        *idx += 1;
                        Ok(Some(v))
                    }
                    None => Ok(None),
                }
            }
            Self::Array { arr, idx } => {
                if *idx >= arr.len() {
                    return Ok(None);
                }
                let v = arr.get(*idx as i64)?;
                *idx += 1;
                Ok(Some(v))
            }
            Self::MapEntries { map, idx } => {
                let guard = map.read();
                match guard.get_index(*idx) {
                    Some((k, v)) => {
                        *idx += 1;
                        Ok(Some(Value::Pair(Arc::new(Pair {
                            first: k.clone(),
                            second: v.clone(),
                        }))))
                    }
                    None => Ok(None),
                }
            }
            Self::Chars { chars, idx } => match chars.get(*idx) {
                Some(c) => {
                    *idx += 1;
                    Ok(Some(Value::Char(*c)))
                }
                None => Ok(None),
            },
            Self::Channel { ch, done } => {
                if *done {
                    return Ok(None);
                }
                match ch.receive_opt(cancel)? {
                    Some(v) => Ok(Some(v)),
                    None => {
                        *done = true;
                        Ok(None)
                    }
                }
            }
            Self::Values(items) => Ok(items.next()),
        }
    }
}
