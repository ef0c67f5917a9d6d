// # MQTT Push Source
//
// Subscribes to the cloud service's per-NAS topic and turns every message
// into a [`RosterPush`].
//
// ## Wire Format
//
// Topic `wyj_nas_events/<identifier>`, QoS 1:
//
// ```json
// { "name": "alice", "password": "p", "expired_at": "2024-03-01 08:00:00", "mac": ["AA:BB"] }
// ```
//
// `mac` is the account's complete current MAC set. `password` and
// `expired_at` may be absent; a push without `expired_at` only revokes.
//
// ## Task Model
//
// `watch()` spawns one task that polls the MQTT event loop and forwards
// decoded pushes into a bounded channel. The task subscribes again after
// every (re)connect and exits as soon as the returned stream is dropped.

use chrono_tz::Tz;
use nasauth_core::config::{PushConfig, RosterConfig};
use nasauth_core::device::{MacAddress, parse_roster_time};
use nasauth_core::traits::{PushSource, RosterPush};
use nasauth_core::{Error, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Pushes buffered between the MQTT task and the engine
const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Requests buffered between the client handle and the event loop
const CLIENT_CHANNEL_CAPACITY: usize = 20;

/// Pause after a broker error before polling again
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Push message as published by the cloud service
#[derive(Deserialize)]
struct PushMessage {
    name: String,

    #[serde(default)]
    password: Option<String>,

    #[serde(default)]
    expired_at: Option<String>,

    #[serde(default)]
    mac: Vec<String>,
}

/// Decode one push payload
///
/// A payload with any unparseable MAC or expiry is rejected as a whole:
/// applying it partially would revoke devices the service still lists.
pub fn decode_push(payload: &[u8], timezone: Tz) -> Result<RosterPush> {
    let message: PushMessage = serde_json::from_slice(payload)?;

    if message.name.trim().is_empty() {
        return Err(Error::push("Push message has an empty account name"));
    }

    let expired_at = match message.expired_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_roster_time(raw, timezone)?),
    };

    let macs = message
        .mac
        .iter()
        .map(|raw| MacAddress::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    Ok(RosterPush {
        account: message.name,
        password: message.password,
        expired_at,
        macs,
    })
}

/// Push source backed by the cloud MQTT broker
pub struct MqttPushSource {
    host: String,
    port: u16,
    topic: String,
    client_id: String,

    /// ⚠️ NEVER log this value
    access_key: String,

    keep_alive: Duration,
    timezone: Tz,
}

impl std::fmt::Debug for MqttPushSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPushSource")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("access_key", &"<REDACTED>")
            .finish()
    }
}

impl MqttPushSource {
    /// Create a push source
    ///
    /// The roster identifier doubles as MQTT client id and username; the
    /// roster access key is the MQTT password.
    pub fn new(push: &PushConfig, roster: &RosterConfig) -> Result<Self> {
        push.validate()?;
        roster.validate()?;

        Ok(Self {
            host: push.host.clone(),
            port: push.port,
            topic: push.topic_for(&roster.identifier),
            client_id: roster.identifier.clone(),
            access_key: roster.access_key.clone(),
            keep_alive: Duration::from_secs(push.keep_alive_secs),
            timezone: roster.timezone,
        })
    }

    /// Topic this source subscribes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_credentials(&self.client_id, &self.access_key);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

impl PushSource for MqttPushSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = RosterPush> + Send + 'static>> {
        let (stream, _task) = self.spawn_listener();
        Box::pin(stream)
    }
}

impl MqttPushSource {
    /// Spawn the event-loop task; it runs until the returned stream is dropped
    fn spawn_listener(&self) -> (ReceiverStream<RosterPush>, JoinHandle<()>) {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), CLIENT_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let topic = self.topic.clone();
        let timezone = self.timezone;
        let broker = format!("{}:{}", self.host, self.port);

        let task = tokio::spawn(async move {
            'events: loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Push stream dropped, disconnecting from {}", broker);
                        let _ = client.try_disconnect();
                        break 'events;
                    }

                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("Connected to push broker {}", broker);
                            // Broker sessions are not relied upon across reconnects
                            if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                                error!("Failed to subscribe to {}: {}", topic, e);
                            }
                        }

                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            match decode_push(&publish.payload, timezone) {
                                Ok(push) => {
                                    debug!("Received roster push: {:?}", push);
                                    if tx.send(push).await.is_err() {
                                        break 'events;
                                    }
                                }
                                Err(e) => warn!("Ignoring malformed push on {}: {}", publish.topic, e),
                            }
                        }

                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            warn!("Push broker {} closed the connection", broker);
                        }

                        Ok(_) => {}

                        Err(e) => {
                            warn!("Push broker {} connection error: {}", broker, e);
                            tokio::select! {
                                _ = tx.closed() => break 'events,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    },
                }
            }
        });

        (ReceiverStream::new(rx), task)
    }
}
