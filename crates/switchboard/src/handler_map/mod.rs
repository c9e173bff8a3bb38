//! Ownership of channels that have been handed to a handler.
//!
//! Each handled channel maps to the unique name of the process that owns
//! it. Owners are watched on the bus with one subscription per process, no
//! matter how many channels it holds; when an owner leaves, every channel it
//! held is closed and forgotten.

use std::collections::BTreeMap;

use tracing::debug;

use crate::bus::{Bus, CloseReason};
use crate::channel::Channel;
use crate::names::{AccountPath, ChannelPath, ClientName, UniqueName};

const HANDLER_MAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handler_map");

/// Who owns one handled channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    channel: Channel,
    owner: Option<UniqueName>,
    owner_name: Option<ClientName>,
}

impl HandlerEntry {
    /// The handled channel.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Unique name of the owning process, when known.
    #[must_use]
    pub const fn owner(&self) -> Option<&UniqueName> {
        self.owner.as_ref()
    }

    /// Well-known name of the owning client, when known.
    #[must_use]
    pub const fn owner_name(&self) -> Option<&ClientName> {
        self.owner_name.as_ref()
    }

    /// Account the channel belongs to.
    #[must_use]
    pub const fn account(&self) -> &AccountPath {
        self.channel.account()
    }
}

/// Channel path to owner mapping.
#[derive(Debug, Default)]
pub struct HandlerMap {
    entries: BTreeMap<ChannelPath, HandlerEntry>,
    watched: BTreeMap<UniqueName, usize>,
}

impl HandlerMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `owner` as handling `channel`.
    ///
    /// Recording an already handled channel moves it to the new owner.
    pub fn record(
        &mut self,
        channel: Channel,
        owner: Option<UniqueName>,
        owner_name: Option<ClientName>,
        bus: &mut dyn Bus,
    ) {
        let path = channel.path().clone();
        if let Some(previous) = self.entries.remove(&path) {
            self.release(previous.owner.as_ref(), bus);
        }
        if let Some(unique) = owner.as_ref() {
            self.retain(unique, bus);
        }
        debug!(
            target: HANDLER_MAP_TARGET,
            channel = %path,
            owner = ?owner,
            client = ?owner_name,
            "channel handled"
        );
        self.entries.insert(
            path,
            HandlerEntry {
                channel,
                owner,
                owner_name,
            },
        );
    }

    /// Closes and forgets every channel `owner` held.
    ///
    /// Returns the closed channels in path order.
    pub fn on_owner_gone(&mut self, owner: &UniqueName, bus: &mut dyn Bus) -> Vec<ChannelPath> {
        let orphaned = self.channels_for_owner(owner);
        for path in &orphaned {
            self.entries.remove(path);
            bus.close_channel(path, CloseReason::OwnerGone);
        }
        if self.watched.remove(owner).is_some() {
            bus.unwatch_owner(owner);
        }
        if !orphaned.is_empty() {
            debug!(
                target: HANDLER_MAP_TARGET,
                owner = %owner,
                closed = orphaned.len(),
                "owner left the bus; closed its channels"
            );
        }
        orphaned
    }

    /// Forgets a channel that no longer exists.
    pub fn on_channel_invalidated(
        &mut self,
        path: &ChannelPath,
        bus: &mut dyn Bus,
    ) -> Option<HandlerEntry> {
        let entry = self.entries.remove(path)?;
        self.release(entry.owner.as_ref(), bus);
        Some(entry)
    }

    /// Looks up the owner of a channel.
    #[must_use]
    pub fn lookup(&self, path: &ChannelPath) -> Option<&HandlerEntry> {
        self.entries.get(path)
    }

    /// Channels held by `owner`, in path order.
    #[must_use]
    pub fn channels_for_owner(&self, owner: &UniqueName) -> Vec<ChannelPath> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.owner.as_ref() == Some(owner))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Returns `true` while `owner` is subscribed to.
    #[must_use]
    pub fn is_watching(&self, owner: &UniqueName) -> bool {
        self.watched.contains_key(owner)
    }

    /// Number of handled channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no channel is handled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over handled channels in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelPath, &HandlerEntry)> + '_ {
        self.entries.iter()
    }

    fn retain(&mut self, owner: &UniqueName, bus: &mut dyn Bus) {
        let count = self.watched.entry(owner.clone()).or_insert(0);
        if *count == 0 {
            bus.watch_owner(owner);
        }
        *count += 1;
    }

    fn release(&mut self, owner: Option<&UniqueName>, bus: &mut dyn Bus) {
        let Some(unique) = owner else {
            return;
        };
        let Some(count) = self.watched.get_mut(unique) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.watched.remove(unique);
            bus.unwatch_owner(unique);
        }
    }
}
