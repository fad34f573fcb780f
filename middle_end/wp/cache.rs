//! The inference result cache.
//!
//! Keys are full inference states (minus the derived slicing bookkeeping).
//! A syntactic hash lookup comes first; when an equivalence oracle is
//! configured, a miss falls back to comparing candidate keys at the same
//! position term by term.  The oracle can only turn misses into hits, so two
//! states the oracle would consider equal never collide unless it is
//! actually consulted.

use std::collections::BTreeMap as Map;
use std::collections::HashMap;

use super::{Contribution, WpState};
use crate::middle_end::ir::InstId;
use crate::middle_end::oracle::EquivalenceOracle;

pub struct WpCache {
    entries: HashMap<WpState, Contribution>,
    by_position: Map<InstId, Vec<WpState>>,
    oracle: Option<Box<dyn EquivalenceOracle>>,
}

impl WpCache {
    pub fn new(oracle: Option<Box<dyn EquivalenceOracle>>) -> Self {
        WpCache {
            entries: HashMap::new(),
            by_position: Map::new(),
            oracle,
        }
    }

    pub fn lookup(&mut self, key: &WpState) -> Option<Contribution> {
        if let Some(hit) = self.entries.get(key) {
            return Some(hit.clone());
        }
        let oracle = self.oracle.as_mut()?;
        let candidates = self.by_position.get(&key.position)?;
        for candidate in candidates {
            if candidate.remaining_loop_unrolls == key.remaining_loop_unrolls
                && candidate.branching_history == key.branching_history
                && candidate.generate_lost_states_for_blocks
                    == key.generate_lost_states_for_blocks
                && candidate.lost == key.lost
                && oracle.equivalent(&candidate.term, &key.term)
                && oracle.equivalent(
                    &candidate.observe_satisfaction_rate,
                    &key.observe_satisfaction_rate,
                )
                && oracle.equivalent(&candidate.focus_rate, &key.focus_rate)
                && oracle.equivalent(&candidate.intentional_loss_rate, &key.intentional_loss_rate)
            {
                return self.entries.get(candidate).cloned();
            }
        }
        None
    }

    pub fn insert(&mut self, key: WpState, value: Contribution) {
        self.by_position
            .entry(key.position.clone())
            .or_default()
            .push(key.clone());
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
