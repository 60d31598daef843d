//! Home Theater Thing Example
//!
//! Demonstrates the full pipeline against simulated hardware:
//! 1. An asynchronous preamp component (unsolicited status messages)
//! 2. A synchronous projector component (only answers when queried,
//!    goes deaf while warming up)
//! 3. A thing with a cascading hook that keeps the preamp powered and
//!    parked on the AUX input whenever it reports OFF
//! 4. A scripted shadow transport standing in for the cloud side

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use seriot_core::{Message, PropertyMap, PropertyValue};
use seriot_devices::{
    Component, ComponentConfig, DeviceDriver, LoopbackStream, TableBuilder, TranslateError,
    TranslationTable,
};
use seriot_things::{ChangeHook, ShadowError, ShadowTransport, Thing};

/// Preamp volume curve: exponential from -69 dB at 0 to +10 dB at 100.
fn volume_to_db(volume: i64) -> f64 {
    10.0 - ((100 - volume) as f64).powf(2.25) / 400.0
}

fn db_to_volume(db: f64) -> i64 {
    (0..=100)
        .min_by(|a, b| {
            let da = (volume_to_db(*a) - db).abs();
            let db_ = (volume_to_db(*b) - db).abs();
            da.partial_cmp(&db_).expect("curve values are finite")
        })
        .expect("range is non-empty")
}

/// Anthem-style preamp: asynchronous, announces every front-panel change.
struct Preamp;

impl DeviceDriver for Preamp {
    fn name(&self) -> &str {
        "preamp"
    }

    fn translation(&self) -> TableBuilder {
        TranslationTable::builder()
            .decode("powerState", "^P1P([01])$", |property, text| match text {
                "1" => Ok("ON".into()),
                "0" => Ok("OFF".into()),
                _ => Err(TranslateError::invalid_text(property, text)),
            })
            .decode("input", "^P1S([0-9])$", decode_input)
            .decode(
                "volume",
                r"^P1VM([+-][0-9]{1,2}(?:\.[0-9]{1,2})?)$",
                decode_volume,
            )
            .decode("muted", "^P1M([01])$", |_, text| Ok((text == "1").into()))
            .decode_many(
                &["input", "volume", "muted"],
                r"^P1S([0-9])V([+-][0-9]{2}\.[0-9])M([01])D[0-9]E[0-9]$",
                |property, text| match property {
                    "input" => decode_input(property, text),
                    "volume" => decode_volume(property, text),
                    _ => Ok((text == "1").into()),
                },
            )
            .encode("powerState", "P1P{}", |value| match value.as_str() {
                Some("ON") => Ok("1".to_string()),
                Some("OFF") => Ok("0".to_string()),
                _ => Err(TranslateError::unsupported("powerState", value)),
            })
            .encode("input", "P1S{}", encode_input)
            .encode("volume", "P1VM{}", |value| {
                let volume = value
                    .as_i64()
                    .filter(|v| (0..=100).contains(v))
                    .ok_or_else(|| TranslateError::unsupported("volume", value))?;
                let db = (volume_to_db(volume) * 2.0).round() / 2.0;
                Ok(format!("{:+.1}", db))
            })
            .encode("muted", "P1M{}", |value| {
                value
                    .as_bool()
                    .map(|muted| if muted { "1" } else { "0" }.to_string())
                    .ok_or_else(|| TranslateError::unsupported("muted", value))
            })
    }

    fn query_status(&self, properties: &PropertyMap) -> Vec<String> {
        // the full status query only works while the preamp is on
        if properties.get("powerState").and_then(|v| v.as_str()) == Some("ON") {
            vec!["P1?\n".to_string()]
        } else {
            vec!["P1P?\n".to_string()]
        }
    }
}

fn decode_input(property: &str, text: &str) -> Result<PropertyValue, TranslateError> {
    match text {
        "0" => Ok("CD".into()),
        "3" => Ok("TAPE".into()),
        "5" => Ok("DVD".into()),
        "6" => Ok("TV".into()),
        "7" => Ok("SAT".into()),
        "8" => Ok("VCR".into()),
        "9" => Ok("AUX".into()),
        _ => Err(TranslateError::invalid_text(property, text)),
    }
}

fn encode_input(value: &PropertyValue) -> Result<String, TranslateError> {
    let code = match value.as_str() {
        Some("CD") => "0",
        Some("TAPE") => "3",
        Some("DVD") => "5",
        Some("TV") => "6",
        Some("SAT") => "7",
        Some("VCR") => "8",
        Some("AUX") => "9",
        _ => return Err(TranslateError::unsupported("input", value)),
    };
    Ok(code.to_string())
}

fn decode_volume(property: &str, text: &str) -> Result<PropertyValue, TranslateError> {
    let db: f64 = text
        .parse()
        .map_err(|_| TranslateError::invalid_text(property, text))?;
    Ok(db_to_volume(db).into())
}

/// Epson-style projector: synchronous, `\r:` terminated replies, refuses
/// commands while warming up or cooling down.
struct Projector;

impl DeviceDriver for Projector {
    fn name(&self) -> &str {
        "projector"
    }

    fn translation(&self) -> TableBuilder {
        TranslationTable::builder()
            .decode("projPowerState", "^PWR=([0-9]{2})$", |property, text| {
                match text {
                    "00" => Ok("OFF".into()),
                    "01" => Ok("ON".into()),
                    "02" => Ok("WARMING".into()),
                    "03" => Ok("COOLING".into()),
                    _ => Err(TranslateError::invalid_text(property, text)),
                }
            })
            .decode("projInput", "^SOURCE=([a-zA-Z0-9]{2})$", |property, text| {
                match text {
                    "30" => Ok("HDMI1".into()),
                    "A0" => Ok("HDMI2".into()),
                    _ => Err(TranslateError::invalid_text(property, text)),
                }
            })
            .encode("projPowerState", "PWR {}\r", |value| match value.as_str() {
                Some(state @ ("ON" | "OFF")) => Ok(state.to_string()),
                _ => Err(TranslateError::unsupported("projPowerState", value)),
            })
            .encode("projInput", "SOURCE {}\r", |value| match value.as_str() {
                Some("HDMI1") => Ok("30".to_string()),
                Some("HDMI2") => Ok("A0".to_string()),
                _ => Err(TranslateError::unsupported("projInput", value)),
            })
    }

    fn query_status(&self, properties: &PropertyMap) -> Vec<String> {
        if properties.get("projPowerState").and_then(|v| v.as_str()) == Some("ON") {
            vec!["PWR?\r".to_string(), "SOURCE?\r".to_string()]
        } else {
            vec!["PWR?\r".to_string()]
        }
    }

    fn ready(&self, properties: &PropertyMap) -> bool {
        match properties.get("projPowerState") {
            Some(PropertyValue::Str(state)) => state == "ON" || state == "OFF",
            _ => true,
        }
    }
}

/// Keeps the preamp on and parked on AUX whenever it reports OFF (a voice
/// assistant lives on that input), and powers the projector only for
/// video inputs.
struct TvHook;

impl ChangeHook for TvHook {
    fn on_change(&self, updated: &PropertyMap) -> Vec<(String, PropertyValue)> {
        let mut cascades = Vec::new();
        if updated.get("powerState").and_then(|v| v.as_str()) == Some("OFF") {
            println!("[hook] preamp went off, returning it to ON / AUX");
            cascades.push(("powerState".to_string(), "ON".into()));
            cascades.push(("input".to_string(), "AUX".into()));
            cascades.push(("projPowerState".to_string(), "OFF".into()));
        }
        match updated.get("input").and_then(|v| v.as_str()) {
            Some("TV") => {
                cascades.push(("projPowerState".to_string(), "ON".into()));
                cascades.push(("projInput".to_string(), "HDMI1".into()));
            }
            Some("DVD") => {
                cascades.push(("projPowerState".to_string(), "ON".into()));
                cascades.push(("projInput".to_string(), "HDMI2".into()));
            }
            _ => {}
        }
        cascades
    }
}

/// Stand-in for the cloud shadow service: replays a scripted set of
/// desired-state deltas, then goes quiet; publishes are printed.
struct ScriptedShadow {
    deltas: tokio::sync::Mutex<VecDeque<PropertyMap>>,
}

impl ScriptedShadow {
    fn new(deltas: Vec<PropertyMap>) -> Self {
        Self {
            deltas: tokio::sync::Mutex::new(deltas.into()),
        }
    }
}

#[async_trait]
impl ShadowTransport for ScriptedShadow {
    async fn receive_delta(&self) -> Option<PropertyMap> {
        tokio::time::sleep(Duration::from_millis(600)).await;
        self.deltas.lock().await.pop_front()
    }

    async fn publish(&self, changes: &PropertyMap) -> Result<(), ShadowError> {
        let mut entries: Vec<String> = changes
            .iter()
            .map(|(property, value)| format!("{}={}", property, value))
            .collect();
        entries.sort();
        println!("[shadow] reported {{{}}}", entries.join(", "));
        Ok(())
    }
}

fn delta(property: &str, value: impl Into<PropertyValue>) -> PropertyMap {
    let mut map = PropertyMap::new();
    map.insert(property.to_string(), value.into());
    map
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    println!("=== Home Theater Thing Demo ===\n");

    // The cloud asks for volume 50, then the TV input.
    let transport = Arc::new(ScriptedShadow::new(vec![
        delta("volume", 50i64),
        delta("input", "TV"),
    ]));

    let preamp_stream = Arc::new(LoopbackStream::new());

    // Simulated projector: confirms each command in query format and
    // answers queries from its tracked state. Power-off replies COOLING,
    // which trips the component's readiness gate for the rest of the run.
    let lamp = std::sync::Mutex::new(("00".to_string(), "30".to_string()));
    let projector_stream = Arc::new(LoopbackStream::with_responder(move |command| {
        let mut lamp = lamp.lock().expect("responder state");
        let reply = match command {
            b"PWR?\r" => format!("PWR={}\r:", lamp.0),
            b"SOURCE?\r" => format!("SOURCE={}\r:", lamp.1),
            b"PWR ON\r" => {
                lamp.0 = "01".to_string();
                "PWR=01\r:".to_string()
            }
            b"PWR OFF\r" => {
                lamp.0 = "00".to_string();
                "PWR=03\r:".to_string()
            }
            b"SOURCE 30\r" => {
                lamp.1 = "30".to_string();
                "SOURCE=30\r:".to_string()
            }
            b"SOURCE A0\r" => {
                lamp.1 = "A0".to_string();
                "SOURCE=A0\r:".to_string()
            }
            _ => return None,
        };
        Some(reply.into_bytes())
    }));

    let mut thing = Thing::new(transport).with_hook(TvHook);
    thing.attach(Component::new(
        Preamp,
        preamp_stream.clone(),
        ComponentConfig {
            timeout: Duration::from_millis(250),
            mailbox_poll: Duration::from_secs(2),
            ..ComponentConfig::default()
        },
    )?)?;
    thing.attach(Component::new(
        Projector,
        projector_stream.clone(),
        ComponentConfig {
            timeout: Duration::from_millis(250),
            ready_backoff: Duration::from_millis(500),
            mailbox_poll: Duration::from_secs(2),
            ..ComponentConfig::synchronous("\r:")
        },
    )?)?;

    // Script the preamp's front panel: power on, pick a source, then the
    // user powers it off (the hook will override that).
    let sender = thing.sender();
    let panel = preamp_stream.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        println!("[panel] preamp powered on from the front panel");
        panel.push(b"P1P1\n").await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        println!("[panel] preamp switched to DVD");
        panel.push(b"P1S5\n").await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        println!("[panel] preamp powered off");
        panel.push(b"P1P0\n").await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        println!("\n=== Demo Complete ===");
        sender.send(Message::Exit);
    });

    thing.run().await;

    println!(
        "preamp received: {:?}",
        String::from_utf8_lossy(&preamp_stream.take_written().await)
    );
    println!(
        "projector received: {:?}",
        String::from_utf8_lossy(&projector_stream.take_written().await)
    );
    Ok(())
}
