//! Victim selection for the buffer pool.
//!
//! A policy only decides the order in which resident frames are considered;
//! the pool skips pinned frames while walking that order.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::frame::FrameId;
use super::usage::UsageList;

pub trait ReplacementPolicy: Send + Sync + fmt::Debug {
    /// First eviction candidate
    fn start(&self, usage: &UsageList) -> Option<FrameId>;

    /// Candidate to try after `current` turned out to be pinned
    fn next(&self, usage: &UsageList, current: FrameId) -> Option<FrameId>;
}

/// Evict the least recently used frame first
#[derive(Debug, Clone, Copy, Default)]
pub struct LruPolicy;

impl ReplacementPolicy for LruPolicy {
    fn start(&self, usage: &UsageList) -> Option<FrameId> {
        usage.lru()
    }

    fn next(&self, usage: &UsageList, current: FrameId) -> Option<FrameId> {
        usage.newer(current)
    }
}

/// Evict the most recently used frame first.
///
/// Used by sequential scans so a single pass over many pages does not push
/// the working set out of the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct MruPolicy;

impl ReplacementPolicy for MruPolicy {
    fn start(&self, usage: &UsageList) -> Option<FrameId> {
        usage.mru()
    }

    fn next(&self, usage: &UsageList, current: FrameId) -> Option<FrameId> {
        usage.older(current)
    }
}

/// Configurable default policy of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Mru,
}

impl EvictionPolicy {
    pub fn build(self) -> Box<dyn ReplacementPolicy> {
        match self {
            EvictionPolicy::Lru => Box::new(LruPolicy),
            EvictionPolicy::Mru => Box::new(MruPolicy),
        }
    }
}
