use crate::game::{
    CardIndex,
    RoundId,
};
use std::collections::HashMap;

/// Cards the local user picked that the server has not confirmed yet.
///
/// Entries are never expired: once a snapshot carries the confirmed estimate
/// the reconciler prefers it, so a stale entry is harmless.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingEstimates {
    by_round: HashMap<RoundId, CardIndex>,
}

impl PendingEstimates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, round: RoundId, card: CardIndex) {
        self.by_round.insert(round, card);
    }

    pub fn get(&self, round: &RoundId) -> Option<CardIndex> {
        self.by_round.get(round).copied()
    }

    /// Bulk load what the server remembers of our votes. A choice made
    /// locally while the bootstrap request was in flight is newer and wins.
    pub fn seed<I>(&mut self, estimates: I)
    where
        I: IntoIterator<Item = (RoundId, CardIndex)>,
    {
        for (round, card) in estimates {
            self.by_round.entry(round).or_insert(card);
        }
    }

    pub fn len(&self) -> usize {
        self.by_round.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_round.is_empty()
    }
}
