//! Channel registry.
//!
//! A channel is an opaque topic name on the internal event bus. A composite
//! channel is defined as the union of other channels and expands to the
//! concrete leaf names it covers, so subscription documents can observe a
//! semantically meaningful channel (`project:lifecycle`) while bindings are
//! stored as plain string sets.

use compact_str::CompactString;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A concrete or composite channel name.
pub type ChannelName = CompactString;

/// Version of the channel-resolution logic.
///
/// Bump whenever a change to discovery or expansion alters which channels a
/// given subscription document resolves to. Bindings recorded under an older
/// version are recomputed by the channel migration at deploy time.
pub const CHANNEL_LOGIC_VERSION: i32 = 1;

/// Registry of composite channels and channels hidden from webhooks.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    composites: HashMap<ChannelName, Vec<ChannelName>>,
    internal_prefixes: Vec<String>,
    logic_version: i32,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(CHANNEL_LOGIC_VERSION)
    }
}

impl ChannelRegistry {
    /// Create an empty registry under the given logic version.
    pub fn new(logic_version: i32) -> Self {
        Self {
            composites: HashMap::new(),
            internal_prefixes: Vec::new(),
            logic_version,
        }
    }

    /// Define `name` as the union of `members`.
    ///
    /// A member may itself be composite. A composite that lists its own name
    /// as a member keeps that name as a leaf, which lets a plain channel grow
    /// extra aliases without changing the name producers publish on.
    pub fn with_composite<I, S>(mut self, name: impl Into<ChannelName>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ChannelName>,
    {
        self.composites
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Hide every channel starting with `prefix` from webhooks.
    pub fn with_internal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefixes.push(prefix.into());
        self
    }

    pub fn logic_version(&self) -> i32 {
        self.logic_version
    }

    /// Whether publishes on `channel` must be ignored by the webhook pipeline.
    pub fn is_internal(&self, channel: &str) -> bool {
        self.internal_prefixes
            .iter()
            .any(|prefix| channel.starts_with(prefix.as_str()))
    }

    /// Expand a channel into its concrete leaf names.
    ///
    /// A channel with no composite definition expands to itself. Cycles are
    /// broken by treating an already-visited name as a leaf.
    pub fn expand(&self, channel: &str) -> BTreeSet<ChannelName> {
        let mut out = BTreeSet::new();
        let mut visited = HashSet::new();
        self.expand_into(channel, &mut visited, &mut out);
        out
    }

    fn expand_into(
        &self,
        channel: &str,
        visited: &mut HashSet<ChannelName>,
        out: &mut BTreeSet<ChannelName>,
    ) {
        let name = ChannelName::from(channel);
        match self.composites.get(channel) {
            Some(members) if visited.insert(name.clone()) => {
                for member in members {
                    self.expand_into(member, visited, out);
                }
            }
            _ => {
                out.insert(name);
            }
        }
    }
}
