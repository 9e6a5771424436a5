//! Relationship reconciliation planning.
//!
//! Pure set arithmetic shared by every store: given what the graph already
//! holds for one side of an entity (its followers or its followees) and what
//! was just fetched, decide which FOLLOWS edges to create, which to turn into
//! UNFOLLOWED, and which UNFOLLOWED edges to restore.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crawlgraph_common::EntityId;

/// Which side of the source entity an edge set describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    /// `(other)-[:FOLLOWS]->(source)`
    Followers,
    /// `(source)-[:FOLLOWS]->(other)`
    Followees,
}

/// Ids fetched for one direction, and whether the fetch is only a slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSet {
    pub ids: Vec<EntityId>,
    /// A partial fetch only adds edges; removals need the complete set.
    pub batch_mode: bool,
}

impl EdgeSet {
    pub fn batch(ids: Vec<EntityId>) -> Self {
        Self {
            ids,
            batch_mode: true,
        }
    }

    pub fn complete(ids: Vec<EntityId>) -> Self {
        Self {
            ids,
            batch_mode: false,
        }
    }
}

/// Changes to apply for one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub new: Vec<EntityId>,
    pub unfollowed: Vec<EntityId>,
    pub refollowed: Vec<EntityId>,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.unfollowed.is_empty() && self.refollowed.is_empty()
    }
}

/// Plan the delta for one direction.
///
/// Fetched ids with no edge at all become `new`. With `batch_mode` off,
/// stored FOLLOWS missing from the fetch become `unfollowed` and stored
/// UNFOLLOWED present in the fetch become `refollowed`.
pub fn plan(
    follows: &HashSet<EntityId>,
    unfollowed: &HashSet<EntityId>,
    fetched: &EdgeSet,
) -> EdgeDelta {
    let mut seen = HashSet::new();
    let fetched_ids: Vec<EntityId> = fetched
        .ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let new = fetched_ids
        .iter()
        .copied()
        .filter(|id| !follows.contains(id) && !unfollowed.contains(id))
        .collect();

    if fetched.batch_mode {
        return EdgeDelta {
            new,
            ..Default::default()
        };
    }

    let mut gone: Vec<EntityId> = follows
        .iter()
        .copied()
        .filter(|id| !seen.contains(id))
        .collect();
    gone.sort_unstable();

    let back = fetched_ids
        .iter()
        .copied()
        .filter(|id| unfollowed.contains(id))
        .collect();

    EdgeDelta {
        new,
        unfollowed: gone,
        refollowed: back,
    }
}
