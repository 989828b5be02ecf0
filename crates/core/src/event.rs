use chrono::{DateTime, Utc};

/// A domain event: an immutable fact emitted by an aggregate.
///
/// Events are append-only. Once committed they are never rewritten; corrections
/// are expressed as new events.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.wine.checked_in").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
