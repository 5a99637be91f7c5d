//! Filter matching shared by server fan-out and client subscriptions.
//!
//! The subject rule is strict in both filters: a filter scoped to a subject
//! never matches an event that carries no subject, so global events cannot
//! leak into an order-scoped view.

use crate::{canonicalize, canonicalize_all, SubjectId, SyncEvent, Timestamp};
use serde::{Deserialize, Serialize};

/// Filters a connected client asked the server to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFilter {
    /// Only events for this subject (never subject-less events)
    #[serde(rename = "subjectID", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    /// Canonical event types; empty means every type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
}

impl ClientFilter {
    /// Build a filter, normalizing blank subjects away and canonicalizing types.
    pub fn new<I, S>(subject_id: Option<SubjectId>, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            subject_id: subject_id.filter(|s| !s.trim().is_empty()),
            event_types: canonicalize_all(event_types),
        }
    }

    /// Build a filter from endpoint query values (`eventTypes` is comma-separated).
    pub fn from_query(subject_id: Option<&str>, event_types: Option<&str>) -> Self {
        Self::new(
            subject_id.map(str::to_string),
            event_types.map(|s| s.split(',')).into_iter().flatten(),
        )
    }

    /// Whether the filter accepts everything.
    pub fn is_unfiltered(&self) -> bool {
        self.subject_id.is_none() && self.event_types.is_empty()
    }

    /// Match an event, canonicalizing its type first.
    pub fn matches(&self, subject_id: Option<&str>, event_type: &str) -> bool {
        self.matches_canonical(subject_id, &canonicalize(event_type))
    }

    /// Match an event whose type is already canonical.
    pub fn matches_canonical(&self, subject_id: Option<&str>, event_type: &str) -> bool {
        if let Some(wanted) = &self.subject_id {
            if subject_id != Some(wanted.as_str()) {
                return false;
            }
        }
        self.event_types.is_empty() || self.event_types.iter().any(|t| canonicalize(t) == event_type)
    }

    /// Comma-separated event types, as sent in the `eventTypes` query parameter.
    pub fn event_types_param(&self) -> Option<String> {
        if self.event_types.is_empty() {
            None
        } else {
            Some(self.event_types.join(","))
        }
    }
}

/// Filter attached to an in-process subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    #[serde(rename = "subjectID", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
    /// Only events stamped at or after this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    /// Soft delivery ceiling; the subscription stays registered once reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl SubscriptionFilter {
    /// A filter that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one subject.
    pub fn subject(mut self, subject_id: impl Into<SubjectId>) -> Self {
        let subject_id = subject_id.into();
        self.subject_id = Some(subject_id).filter(|s| !s.trim().is_empty());
        self
    }

    /// Restrict to a set of event types (aliases accepted).
    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.event_types = canonicalize_all(event_types);
        self
    }

    /// Only deliver events stamped at or after `since`.
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Stop delivering after `limit` events.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes the subject, type and time criteria.
    pub fn matches(&self, event: &SyncEvent) -> bool {
        if let Some(wanted) = &self.subject_id {
            if event.subject() != Some(wanted.as_str()) {
                return false;
            }
        }
        if !self.event_types.is_empty() {
            let event_type = canonicalize(&event.event_type);
            if !self.event_types.iter().any(|t| canonicalize(t) == event_type) {
                return false;
            }
        }
        match self.since {
            Some(since) => event.timestamp >= since,
            None => true,
        }
    }

    /// Whether another delivery is allowed after `delivered` deliveries.
    pub fn has_capacity(&self, delivered: u64) -> bool {
        self.limit.map_or(true, |limit| delivered < limit)
    }
}
