//! Table of requests awaiting a reply.

use centrifuge_protocol::{InboundEnvelope, Method};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::ClientError;
use crate::registry::Registration;

/// Outcome of a request.
pub type Reply = Result<InboundEnvelope, ClientError>;

/// One-shot continuation invoked with the outcome of a request.
pub type Completion = Box<dyn FnOnce(Reply) + Send + 'static>;

/// A request that has been sent and not yet answered.
pub(crate) struct PendingRequest {
    pub(crate) method: Method,
    pub(crate) channel: Option<String>,
    /// Set when the request registered a channel delegate.
    pub(crate) registration: Option<Registration>,
    completion: Completion,
}

impl PendingRequest {
    pub(crate) fn new(method: Method, channel: Option<String>, completion: Completion) -> Self {
        Self {
            method,
            channel,
            registration: None,
            completion,
        }
    }

    pub(crate) fn with_registration(mut self, registration: Option<Registration>) -> Self {
        self.registration = registration;
        self
    }

    /// Consume the request, running its completion.
    pub(crate) fn complete(self, reply: Reply) {
        (self.completion)(reply);
    }
}

/// Correlation id to pending request.
///
/// An entry leaves the table either through [`take`](Self::take), which hands
/// it to exactly one caller, or through [`clear`](Self::clear), which drops it
/// without running the completion.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    /// Track a request. Gives it back if `uid` is already pending.
    pub(crate) fn insert(
        &mut self,
        uid: String,
        request: PendingRequest,
    ) -> Result<(), PendingRequest> {
        match self.entries.entry(uid) {
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
            Entry::Occupied(_) => Err(request),
        }
    }

    pub(crate) fn take(&mut self, uid: &str) -> Option<PendingRequest> {
        self.entries.remove(uid)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Abandon every pending request. Returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}
