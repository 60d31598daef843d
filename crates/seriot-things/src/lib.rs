//! Thing aggregation for the seriot platform.
//!
//! A *thing* merges the properties of several components into one coherent
//! external device identity. It routes desired-state deltas from the
//! shadow service down to the owning component, batches and diffs
//! hardware reports coming back up, runs the cascading side-effect hook,
//! and publishes consolidated state updates.

pub mod shadow;
pub mod thing;

pub use shadow::{NullTransport, ShadowError, ShadowTransport};
pub use thing::{ChangeHook, NoChanges, Thing, ThingConfig, ThingError};
