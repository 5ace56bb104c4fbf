//! # Zonesync Core
//!
//! Authoritative bookkeeping shared by the world server and its clients.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ IdAllocator  │   │   Catalog    │   │  SceneHost (trait)   │
//! │ players/net  │   │ zones, tmpls │   │ instantiate / defer  │
//! └──────────────┘   └──────┬───────┘   └──────────┬───────────┘
//!                           └────────┬─────────────┘
//!                             ┌──────▼───────┐
//!                             │ ReplicaState │  zones + entity records
//!                             └──────────────┘
//! ```
//!
//! Nothing in this crate locks or spawns threads. The networking crate
//! wraps these types in the per-role state that its polling loop owns.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod allocator;
pub mod catalog;
pub mod error;
pub mod replica;
pub mod scene;

pub use allocator::IdAllocator;
pub use catalog::{Catalog, EntityTemplate, TemplateRef, ZoneDescriptor};
pub use error::{RegistryError, RegistryResult, ReplicaError, ReplicaResult, SceneError};
pub use replica::{EntityRecord, ReplicaState, Zone};
pub use scene::{
    Attachment, DeferredTask, HeadlessSceneHost, InstanceHandle, MockSceneHost, SceneHost,
};
