//! Channel subscriptions and their delegates.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::delegate::ChannelDelegate;

/// Lookup result for a channel.
pub(crate) enum Lookup {
    Live(Arc<dyn ChannelDelegate>),
    /// Registered, but the caller dropped the delegate.
    Dropped,
    Missing,
}

/// What a registration displaced, so a rejected subscribe can be undone.
pub(crate) enum Registration {
    Created,
    Replaced(Weak<dyn ChannelDelegate>),
}

/// Channel name to (non-owning) channel delegate.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    channels: HashMap<String, Weak<dyn ChannelDelegate>>,
}

impl SubscriptionRegistry {
    /// Register a delegate, replacing any previous one for the channel.
    pub(crate) fn insert(
        &mut self,
        channel: impl Into<String>,
        delegate: Weak<dyn ChannelDelegate>,
    ) -> Registration {
        match self.channels.insert(channel.into(), delegate) {
            Some(previous) => Registration::Replaced(previous),
            None => Registration::Created,
        }
    }

    /// Undo an [`insert`](Self::insert), putting back whatever it replaced.
    pub(crate) fn revert(&mut self, channel: &str, registration: Registration) {
        match registration {
            Registration::Created => {
                self.channels.remove(channel);
            }
            Registration::Replaced(previous) => {
                self.channels.insert(channel.to_string(), previous);
            }
        }
    }

    pub(crate) fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    pub(crate) fn lookup(&self, channel: &str) -> Lookup {
        match self.channels.get(channel).map(Weak::upgrade) {
            Some(Some(delegate)) => Lookup::Live(delegate),
            Some(None) => Lookup::Dropped,
            None => Lookup::Missing,
        }
    }

    pub(crate) fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Registered channel names, sorted.
    pub(crate) fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Drop every subscription. Returns how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.channels.len();
        self.channels.clear();
        count
    }
}
