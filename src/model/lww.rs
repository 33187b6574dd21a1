//! Last-Writer-Wins register: the CRDT container backing `prop`.

use serde::{Deserialize, Serialize};

use super::clock::EventId;
use super::value::PropertyValue;

/// A single LWW register. Join keeps whichever side has the greater
/// [`EventId`] by the total order defined on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LWWRegister {
    pub event_id: EventId,
    pub value: PropertyValue,
}

impl LWWRegister {
    pub fn new(event_id: EventId, value: PropertyValue) -> Self {
        Self { event_id, value }
    }

    /// Overwrites `self` with `candidate` if `candidate`'s event id is
    /// strictly greater, per the op-application rule ("if current
    /// register's EventId is less or absent, overwrite").
    pub fn apply(&mut self, candidate: LWWRegister) {
        if candidate.event_id > self.event_id {
            *self = candidate;
        }
    }

    /// Join picks whichever side has the greater EventId.
    pub fn join(&self, other: &Self) -> Self {
        if other.event_id > self.event_id {
            other.clone()
        } else {
            self.clone()
        }
    }
}
