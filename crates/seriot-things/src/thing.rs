//! The thing reconciliation loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use seriot_core::{Mailbox, MailboxSender, Message, PropertyMap, PropertyValue, Source};
use seriot_devices::{Component, ComponentHandle};

use crate::shadow::ShadowTransport;

/// Errors raised while assembling a thing.
#[derive(Debug, thiserror::Error)]
pub enum ThingError {
    /// Two components claim the same property. Ownership must be
    /// unambiguous or deltas cannot be routed, so this is rejected
    /// outright rather than silently letting the later registration win.
    #[error("property {property} is owned by {owner}, {component} cannot register it too")]
    DuplicateProperty {
        property: String,
        owner: String,
        component: String,
    },
}

/// Cascading side-effect hook.
///
/// Invoked during batch processing every time a component report is
/// accumulated, with the updates gathered so far this cycle. Returned
/// `(property, value)` pairs are forwarded to their owning components
/// immediately, within the same batch, so one device's state change can
/// drive another device without waiting a cycle.
pub trait ChangeHook: Send + Sync {
    fn on_change(&self, updated: &PropertyMap) -> Vec<(String, PropertyValue)> {
        let _ = updated;
        Vec::new()
    }
}

/// The default hook: no cascading behavior.
#[derive(Debug, Clone, Default)]
pub struct NoChanges;

impl ChangeHook for NoChanges {}

/// Timing knobs for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct ThingConfig {
    /// After the first event of a batch arrives, how long to wait for the
    /// rest of the burst before processing.
    pub coalesce_window: Duration,
}

impl Default for ThingConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(100),
        }
    }
}

/// One coherent external device identity built from several components.
pub struct Thing {
    transport: Arc<dyn ShadowTransport>,
    config: ThingConfig,
    hook: Box<dyn ChangeHook>,
    events_tx: MailboxSender,
    events: Mailbox,
    components: Vec<ComponentHandle>,
    owners: HashMap<String, usize>,
    /// Last reported value per property; only touched right before a
    /// publish.
    local_shadow: PropertyMap,
}

impl Thing {
    pub fn new(transport: Arc<dyn ShadowTransport>) -> Self {
        Self::with_config(transport, ThingConfig::default())
    }

    pub fn with_config(transport: Arc<dyn ShadowTransport>, config: ThingConfig) -> Self {
        let (events_tx, events) = Mailbox::channel();
        Self {
            transport,
            config,
            hook: Box::new(NoChanges),
            events_tx,
            events,
            components: Vec::new(),
            owners: HashMap::new(),
            local_shadow: PropertyMap::new(),
        }
    }

    /// Install the cascading side-effect hook.
    pub fn with_hook(mut self, hook: impl ChangeHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    /// Register a component as the owner of its properties and start its
    /// loops. Fails if any of its properties is already owned.
    pub fn attach(&mut self, component: Component) -> Result<(), ThingError> {
        let names = component.property_names();
        for property in &names {
            if let Some(&index) = self.owners.get(property) {
                return Err(ThingError::DuplicateProperty {
                    property: property.clone(),
                    owner: self.components[index].name().to_string(),
                    component: component.name().to_string(),
                });
            }
        }

        let index = self.components.len();
        for property in &names {
            self.owners.insert(property.clone(), index);
            self.local_shadow
                .insert(property.clone(), PropertyValue::Unknown);
        }
        info!(
            component = component.name(),
            properties = names.len(),
            "component attached"
        );
        self.components.push(component.spawn(self.events_tx.clone()));
        Ok(())
    }

    /// Handle for injecting events from outside the loop (tests, signal
    /// handlers sending `Exit`, ...).
    pub fn sender(&self) -> MailboxSender {
        self.events_tx.clone()
    }

    /// Attached component handles, in attach order.
    pub fn components(&self) -> &[ComponentHandle] {
        &self.components
    }

    /// Run the reconciliation loop until an `Exit` event arrives, then
    /// shut every component down.
    pub async fn run(mut self) {
        info!(components = self.components.len(), "thing started");

        // pump shadow deltas into the event queue as external updates
        let transport = self.transport.clone();
        let deltas = self.events_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(delta) = transport.receive_delta().await {
                for (property, value) in delta {
                    deltas.send(Message::external(property, value));
                }
            }
            debug!("delta stream ended");
        });

        self.reconcile().await;

        pump.abort();
        for component in &self.components {
            component.exit();
        }
        for component in self.components {
            component.join().await;
        }
        info!("thing stopped");
    }

    async fn reconcile(&mut self) {
        loop {
            let Some(first) = self.events.recv().await else {
                return;
            };
            // a burst of updates often follows the first one; absorb it
            sleep(self.config.coalesce_window).await;
            let mut batch = vec![first];
            batch.extend(self.events.drain());

            let mut updated = PropertyMap::new();
            for message in batch {
                match message {
                    Message::Exit => return,
                    Message::Update {
                        source: Source::External,
                        property,
                        value,
                    } => {
                        debug!(%property, %value, "external update");
                        self.route(&property, value);
                    }
                    Message::Update {
                        source: Source::Component(name),
                        property,
                        value,
                    } => {
                        debug!(component = %name, %property, %value, "component report");
                        updated.insert(property, value);
                        for (property, value) in self.hook.on_change(&updated) {
                            debug!(%property, %value, "cascading update");
                            self.route(&property, value);
                        }
                    }
                }
            }

            // report only what actually moved since the last publish
            let mut changes = PropertyMap::new();
            for (property, value) in &updated {
                if self.local_shadow.get(property) != Some(value) {
                    changes.insert(property.clone(), value.clone());
                }
            }
            if !changes.is_empty() {
                for (property, value) in &changes {
                    self.local_shadow.insert(property.clone(), value.clone());
                }
                info!(count = changes.len(), "publishing state update");
                if let Err(err) = self.transport.publish(&changes).await {
                    warn!(error = %err, "shadow publish failed");
                }
            }
        }
    }

    /// Forward one desired value to the component owning the property.
    fn route(&self, property: &str, value: PropertyValue) {
        match self.owners.get(property) {
            Some(&index) => self.components[index].update(property, value),
            None => warn!(%property, "no component owns property, dropping update"),
        }
    }
}
