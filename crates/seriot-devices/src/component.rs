//! The per-device concurrency engine.
//!
//! A [`Component`] binds one [`DeviceDriver`] to one [`ByteStream`] and
//! runs the loops that keep the device and its properties in sync:
//!
//! - the **write loop** (always): waits on the component mailbox, encodes
//!   property updates into commands, and falls back to status queries when
//!   the mailbox is idle. While the driver reports not-ready the loop
//!   backs off without sending commands or queries.
//! - the **read loop** (asynchronous devices only): frames unsolicited
//!   device output into lines and decodes them into property updates.
//!
//! Synchronous devices never speak unprompted, so they get no read loop;
//! the write loop reads each reply inline under the same read lock the
//! read loop would use. Changed properties are pushed onto the owning
//! thing's event queue; unchanged decodes are suppressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use seriot_core::{Mailbox, MailboxSender, Message, PropertyMap, PropertyValue, RecvTimeoutError};

use crate::stream::{ByteStream, LineFramer};
use crate::translate::{TableBuilder, TranslateError, TranslationTable};

/// Errors fatal to a component's loops.
///
/// Translation failures are *not* in here: they are recovered in place and
/// only cost the one update or response they occurred in.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The stream is closed or broken. Terminates this component's loops
    /// without affecting any other component.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver registered an unbuildable translation table.
    #[error("translation table: {0}")]
    Translate(#[from] TranslateError),
}

/// Device-type behavior plugged into a [`Component`].
///
/// Implementations are pure protocol logic: they register translation
/// rules and answer readiness/status questions from a property snapshot.
/// All I/O and concurrency stays in the component.
pub trait DeviceDriver: Send + Sync + 'static {
    /// Component name. Also the `source` tag on every event this
    /// component emits.
    fn name(&self) -> &str;

    /// Register this device type's translation rules.
    fn translation(&self) -> TableBuilder;

    /// Commands to send when the mailbox has been idle for one poll
    /// interval. Return several to fan out a status sweep; each is sent
    /// (and, on synchronous devices, answered) individually.
    fn query_status(&self, properties: &PropertyMap) -> Vec<String> {
        let _ = properties;
        Vec::new()
    }

    /// Whether the device can accept commands right now. Drivers for
    /// devices that go deaf during state transitions (projector warm-up,
    /// power cycling) override this; while it returns `false` the write
    /// loop holds all commands *and* status queries.
    fn ready(&self, properties: &PropertyMap) -> bool {
        let _ = properties;
        true
    }
}

/// Timing and framing knobs for one component.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// End-of-line marker in device output. May be multi-byte.
    pub eol: String,
    /// Inactivity timeout for one framed read.
    pub timeout: Duration,
    /// Synchronous devices only answer when written to and get no read
    /// loop; replies are read inline after each write.
    pub synchronous: bool,
    /// Backoff between readiness re-checks while the device is busy.
    pub ready_backoff: Duration,
    /// How long the write loop waits on its mailbox before sending a
    /// status query instead.
    pub mailbox_poll: Duration,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            eol: "\n".to_string(),
            timeout: Duration::from_secs(5),
            synchronous: false,
            ready_backoff: Duration::from_secs(5),
            mailbox_poll: Duration::from_secs(5),
        }
    }
}

impl ComponentConfig {
    /// Config for a synchronous device with the given EOL marker.
    pub fn synchronous(eol: impl Into<String>) -> Self {
        Self {
            eol: eol.into(),
            synchronous: true,
            ..Self::default()
        }
    }
}

/// One device connection presented as named, typed properties.
pub struct Component {
    driver: Arc<dyn DeviceDriver>,
    stream: Arc<dyn ByteStream>,
    config: ComponentConfig,
    table: TranslationTable,
    cache: Arc<RwLock<PropertyMap>>,
}

impl Component {
    /// Bind a driver to its stream and build the translation table.
    ///
    /// Every property named by any rule starts as `Unknown`; the first
    /// idle-mailbox status query after spawn refreshes them from the
    /// device.
    pub fn new(
        driver: impl DeviceDriver,
        stream: Arc<dyn ByteStream>,
        config: ComponentConfig,
    ) -> Result<Self, ComponentError> {
        let table = driver.translation().build()?;
        let cache: PropertyMap = table
            .properties()
            .into_iter()
            .map(|name| (name, PropertyValue::Unknown))
            .collect();
        Ok(Self {
            driver: Arc::new(driver),
            stream,
            config,
            table,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Names of every property this component owns.
    pub fn property_names(&self) -> Vec<String> {
        self.table.properties()
    }

    /// Start the loops. Events for changed properties are sent to
    /// `events`; commands for this component go through the returned
    /// handle.
    pub fn spawn(self, events: MailboxSender) -> ComponentHandle {
        let (commands, mailbox) = Mailbox::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let runtime = Arc::new(Runtime {
            name: self.driver.name().to_string(),
            driver: self.driver,
            stream: self.stream,
            framer: Mutex::new(LineFramer::new(self.config.eol.clone())),
            table: self.table,
            cache: self.cache.clone(),
            config: self.config,
            stop: stop.clone(),
            events,
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Runtime::write_loop(runtime.clone(), mailbox)));
        if !runtime.config.synchronous {
            tasks.push(tokio::spawn(Runtime::read_loop(runtime.clone())));
        }

        ComponentHandle {
            name: runtime.name.clone(),
            commands,
            stop,
            cache: self.cache,
            tasks,
        }
    }
}

/// Control surface for a spawned component.
pub struct ComponentHandle {
    name: String,
    commands: MailboxSender,
    stop: Arc<AtomicBool>,
    cache: Arc<RwLock<PropertyMap>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ComponentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the component to drive `property` to `value`.
    pub fn update(&self, property: impl Into<String>, value: impl Into<PropertyValue>) {
        self.commands.send(Message::external(property, value));
    }

    /// Shut the component down.
    ///
    /// The write loop exits on its next mailbox wake-up. A read loop only
    /// observes the stop flag between reads, so shutdown can lag by up to
    /// one read timeout; that latency is a bound, not a fault.
    pub fn exit(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.commands.send(Message::Exit);
    }

    /// Snapshot of the component's current property values.
    pub async fn properties(&self) -> PropertyMap {
        self.cache.read().await.clone()
    }

    /// Wait for the component's loops to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// State shared by a component's loops.
struct Runtime {
    name: String,
    driver: Arc<dyn DeviceDriver>,
    stream: Arc<dyn ByteStream>,
    /// Serializes all stream reads: the read loop and the write loop's
    /// inline read never run concurrently.
    framer: Mutex<LineFramer>,
    table: TranslationTable,
    cache: Arc<RwLock<PropertyMap>>,
    config: ComponentConfig,
    stop: Arc<AtomicBool>,
    events: MailboxSender,
}

impl Runtime {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn snapshot(&self) -> PropertyMap {
        self.cache.read().await.clone()
    }

    async fn write_loop(self: Arc<Self>, mut mailbox: Mailbox) {
        info!(component = %self.name, "write loop started");
        'run: while !self.stopped() {
            // Readiness gate: while the device is busy, neither queued
            // updates nor status queries go out.
            while !self.driver.ready(&self.snapshot().await) {
                debug!(component = %self.name, "device busy, holding commands");
                tokio::time::sleep(self.config.ready_backoff).await;
                if self.stopped() {
                    break 'run;
                }
            }

            match mailbox.recv_timeout(self.config.mailbox_poll).await {
                Ok(Message::Exit) => break,
                Ok(Message::Update {
                    property, value, ..
                }) => {
                    if self.send_update(&property, &value).await.is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.poll_status().await.is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Closed) => break,
            }
        }

        // Teardown is the write loop's job: it always exists, and the
        // stream must be closed exactly once.
        self.stop.store(true, Ordering::SeqCst);
        if let Err(err) = self.stream.close().await {
            warn!(component = %self.name, error = %err, "error closing stream");
        }
        info!(component = %self.name, "write loop stopped");
    }

    async fn read_loop(self: Arc<Self>) {
        info!(component = %self.name, "read loop started");
        while !self.stopped() {
            let result = {
                let mut framer = self.framer.lock().await;
                framer
                    .read_line(self.stream.as_ref(), self.config.timeout)
                    .await
            };
            match result {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => self.apply_line(&line).await,
                Err(err) => {
                    if !self.stopped() {
                        error!(component = %self.name, error = %err, "stream read failed");
                    }
                    break;
                }
            }
        }
        self.stop.store(true, Ordering::SeqCst);
        info!(component = %self.name, "read loop stopped");
    }

    /// Encode one requested update and send it. Translation problems are
    /// recovered here; only stream failures propagate.
    async fn send_update(
        &self,
        property: &str,
        value: &PropertyValue,
    ) -> Result<(), ComponentError> {
        debug!(component = %self.name, %property, %value, "update requested");
        match self.table.encode(property, value) {
            Ok(Some(command)) => {
                if let Some(reply) = self.transmit(&command).await? {
                    self.apply_line(&reply).await;
                }
                Ok(())
            }
            Ok(None) => {
                warn!(component = %self.name, %property, "no command rule matches property");
                Ok(())
            }
            Err(err) => {
                warn!(component = %self.name, %property, error = %err, "device state unchanged");
                Ok(())
            }
        }
    }

    /// Idle-mailbox fallback: ask the driver for status queries and send
    /// each one.
    async fn poll_status(&self) -> Result<(), ComponentError> {
        for command in self.driver.query_status(&self.snapshot().await) {
            if let Some(reply) = self.transmit(&command).await? {
                self.apply_line(&reply).await;
            }
        }
        Ok(())
    }

    /// Write one command. On synchronous devices the reply is read inline
    /// under the read lock and returned for decoding.
    async fn transmit(&self, command: &str) -> Result<Option<String>, ComponentError> {
        let result = if self.config.synchronous {
            let mut framer = self.framer.lock().await;
            match self.stream.write(command.as_bytes()).await {
                Ok(()) => framer
                    .read_line(self.stream.as_ref(), self.config.timeout)
                    .await
                    .map(|line| (!line.is_empty()).then_some(line)),
                Err(err) => Err(err),
            }
        } else {
            self.stream.write(command.as_bytes()).await.map(|()| None)
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(err) => {
                error!(component = %self.name, error = %err, "stream write failed");
                Err(err.into())
            }
        }
    }

    /// Decode one device line and report every property whose value
    /// actually changed. Equal values are suppressed.
    async fn apply_line(&self, line: &str) {
        for (property, value) in self.table.decode_line(line) {
            let changed = {
                let mut cache = self.cache.write().await;
                if cache.get(&property) == Some(&value) {
                    false
                } else {
                    cache.insert(property.clone(), value.clone());
                    true
                }
            };
            if changed {
                debug!(component = %self.name, %property, %value, "device reported change");
                self.events
                    .send(Message::from_component(self.name.clone(), property, value));
            }
        }
    }
}
