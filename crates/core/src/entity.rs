//! Entity trait: identity that survives changes to every other attribute.

/// Entity marker + minimal interface.
///
/// A wine keeps its identifier for life; label fields may be refined by later
/// scans but the id never changes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
