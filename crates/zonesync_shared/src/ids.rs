//! Identifier namespaces.
//!
//! Every identity on the wire is an unsigned 32-bit integer. Player and
//! network-entity identities are handed out by the server's allocators;
//! zone and template identities come from the static catalog.

/// Server-assigned identity of a connected player.
pub type PlayerId = u32;

/// Server-assigned identity of one live entity instance.
pub type NetworkId = u32;

/// Identity of an entity template (which prefab/kind to instantiate).
pub type TemplateId = u32;

/// Identity of a zone in the catalog.
pub type ZoneId = u32;

/// Wire value meaning "no associated player".
///
/// The player allocator starts at 1, so 0 never names a real player.
pub const NO_PLAYER: PlayerId = 0;
