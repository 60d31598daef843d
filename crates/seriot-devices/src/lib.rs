//! Device runtime for the seriot platform.
//!
//! A *component* owns one line-oriented device connection and presents it
//! as a set of named, typed properties. The pieces:
//!
//! - **ByteStream**: the opaque transport to the physical device
//! - **LineFramer**: turns raw reads into EOL-delimited lines
//! - **TranslationTable**: declarative wire-line ↔ property-value mapping
//! - **Component**: the per-device concurrency engine (write loop, read
//!   loop, readiness gating, status polling)
//!
//! Components push property changes onto a thing's event queue and accept
//! desired-state updates through their own mailbox; they never touch each
//! other's state.

pub mod component;
pub mod stream;
pub mod translate;

pub use component::{
    Component, ComponentConfig, ComponentError, ComponentHandle, DeviceDriver,
};
pub use stream::{ByteStream, LineFramer, LoopbackStream};
pub use translate::{TableBuilder, TranslateError, TranslationTable};
