//! Messages exchanged over mailboxes.

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Where a property update came from.
///
/// The thing uses the source to pick a routing direction: external updates
/// are desired-state requests and flow down to the owning component, while
/// component updates are hardware reports and flow up into the shadow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// The external state store (a shadow delta).
    External,
    /// The named component reporting its own state.
    Component(String),
}

impl Source {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Component(name) => write!(f, "{}", name),
        }
    }
}

/// A mailbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A single property changed (or is requested to change).
    Update {
        source: Source,
        property: String,
        value: PropertyValue,
    },
    /// Terminate the receiving loop.
    Exit,
}

impl Message {
    /// An update originating from the external state store.
    pub fn external(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::Update {
            source: Source::External,
            property: property.into(),
            value: value.into(),
        }
    }

    /// An update reported by a component.
    pub fn from_component(
        component: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::Update {
            source: Source::Component(component.into()),
            property: property.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let msg = Message::external("powerState", "OFF");
        match msg {
            Message::Update {
                source,
                property,
                value,
            } => {
                assert!(source.is_external());
                assert_eq!(property, "powerState");
                assert_eq!(value, PropertyValue::Str("OFF".into()));
            }
            _ => panic!("expected update"),
        }

        let msg = Message::from_component("preamp", "volume", 83i64);
        match msg {
            Message::Update { source, .. } => {
                assert_eq!(source, Source::Component("preamp".into()))
            }
            _ => panic!("expected update"),
        }
    }
}
