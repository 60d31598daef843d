//! The external shadow service seam.
//!
//! The cloud side is opaque to a thing: all it needs is a stream of
//! desired-state deltas coming in and a place to publish reported-state
//! changes going out. Connection management, authentication and wire
//! format all live behind this trait.

use async_trait::async_trait;
use tracing::debug;

use seriot_core::PropertyMap;

/// Errors surfaced by a shadow transport.
#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    /// The transport could not deliver the update.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Connection to the external desired/reported state store.
#[async_trait]
pub trait ShadowTransport: Send + Sync {
    /// Wait for the next desired-state delta: a flat map of property to
    /// desired value. `None` means the transport is closed for good.
    async fn receive_delta(&self) -> Option<PropertyMap>;

    /// Publish the changed subset of device state.
    ///
    /// These are authoritative hardware reports, so a transport records
    /// them as both the reported and the desired view; otherwise the store
    /// would raise a delta asking for a state the hardware already reached.
    async fn publish(&self, changes: &PropertyMap) -> Result<(), ShadowError>;
}

/// Transport for things that run without a shadow service attached.
///
/// Never yields a delta and drops every publish. Useful for local bring-up
/// of device drivers.
#[derive(Debug, Clone, Default)]
pub struct NullTransport;

#[async_trait]
impl ShadowTransport for NullTransport {
    async fn receive_delta(&self) -> Option<PropertyMap> {
        std::future::pending().await
    }

    async fn publish(&self, changes: &PropertyMap) -> Result<(), ShadowError> {
        debug!(count = changes.len(), "discarding state update (no transport)");
        Ok(())
    }
}
