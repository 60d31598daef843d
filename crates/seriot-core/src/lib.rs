//! Core types for the seriot runtime.
//!
//! This crate holds the pieces shared by every other seriot crate:
//! - **PropertyValue**: the typed scalar a device property can hold
//! - **Message**: the envelope exchanged between components and things
//! - **Mailbox**: the ordered multi-producer/single-consumer channel both
//!   sides communicate through
//!
//! Components and things never share mutable state; everything crosses a
//! `Mailbox`.

pub mod mailbox;
pub mod message;
pub mod value;

pub use mailbox::{Mailbox, MailboxSender, RecvTimeoutError};
pub use message::{Message, Source};
pub use value::{PropertyMap, PropertyValue};
