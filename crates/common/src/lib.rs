//! # StreamGrid Common Crate
//!
//! Shared building blocks for StreamGrid storage nodes:
//!
//! | Module          | Description                                         |
//! |-----------------|-----------------------------------------------------|
//! | `registry`      | Data model and the `StreamRegistry` trait           |
//! | `sharding`      | Pure fleet-partitioning filter over unit keys       |
//! | `mock_registry` | Deterministic in-memory registry for tests          |
//!
//! The registry trait is the seam between the assignment core and the
//! chain client: production nodes plug in the real contract client,
//! tests plug in [`MockRegistry`].

pub mod mock_registry;
pub mod registry;
pub mod sharding;

pub use mock_registry::MockRegistry;
pub use registry::{
    AssignmentChange, AssignmentEvent, AssignmentEventHandler, AssignmentEventKind,
    AssignmentSnapshot, RegistryError, StreamMetadata, StreamRegistry, SubscriptionId, UnitKey,
};
pub use sharding::{ShardingError, ShardingParams};
