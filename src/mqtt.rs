//! MQTT link
//!
//! Connects the bridge to the broker:
//! - subscribes to the command topics after every (re)connect
//! - hands each inbound message to the dispatcher on its own task
//! - republishes every status event, retained, under the prefix
//! - announces `bridge/status` online/offline, with offline as last will

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, SubscribeFilter, Transport,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::CecBridge;
use crate::config::MqttConfig;
use crate::dispatcher::CommandDispatcher;
use crate::events::{SharedEventBus, StatusEvent};

/// Command topics, relative to the prefix
pub const COMMAND_TOPICS: [&str; 6] = [
    "cec/device/+/power/set",
    "cec/audio/volume/set",
    "cec/audio/mute/set",
    "cec/tx",
    "cec/refresh",
    "cec/scan",
];

pub const STATUS_TOPIC: &str = "bridge/status";

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// How long shutdown waits for the offline status to leave
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

pub fn full_topic(prefix: &str, path: &str) -> String {
    format!("{}/{}", prefix, path)
}

/// Topic with `<prefix>/` removed, `None` if it is not under the prefix
pub fn strip_prefix<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic.strip_prefix(prefix)?.strip_prefix('/')
}

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.name, &config.broker, config.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(user, config.password.clone().unwrap_or_default());
    }
    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options.set_last_will(LastWill::new(
        full_topic(&config.prefix, STATUS_TOPIC),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    options
}

pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    prefix: String,
    dispatcher: CommandDispatcher,
    /// Forwards status events; started with the link so nothing published
    /// before the broker connects is lost
    publisher: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl MqttLink {
    /// Must be called inside the runtime
    pub fn new(
        config: &MqttConfig,
        bridge: Arc<CecBridge>,
        events: &SharedEventBus,
        shutdown: CancellationToken,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
        let publisher = tokio::spawn(publish_events(
            client.clone(),
            config.prefix.clone(),
            events.subscribe(),
            shutdown.clone(),
        ));
        info!(
            "MQTT broker {}:{} with prefix '{}'",
            config.broker, config.port, config.prefix
        );
        Self {
            client,
            eventloop,
            prefix: config.prefix.clone(),
            dispatcher: CommandDispatcher::new(bridge),
            publisher,
            shutdown,
        }
    }

    /// Drive the connection until shutdown, then publish offline and
    /// disconnect
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("MQTT link shutting down");
                    break;
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        tokio::spawn(announce(self.client.clone(), self.prefix.clone()));
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        self.on_message(&publish.topic, payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }

        self.publisher.abort();
        self.say_goodbye().await;
        Ok(())
    }

    fn on_message(&self, topic: &str, payload: String) {
        let Some(path) = strip_prefix(&self.prefix, topic).map(str::to_string) else {
            debug!("Ignoring message outside prefix: {}", topic);
            return;
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&path, &payload).await {
                warn!("Command {} ({}) failed: {}", path, payload, e);
            }
        });
    }

    async fn say_goodbye(&mut self) {
        let status = full_topic(&self.prefix, STATUS_TOPIC);
        if let Err(e) = self
            .client
            .try_publish(status, QoS::AtLeastOnce, true, "offline")
        {
            warn!("Could not queue offline status: {}", e);
        }
        let _ = self.client.try_disconnect();

        let eventloop = &mut self.eventloop;
        let _ = timeout(FLUSH_TIMEOUT, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;
        info!("MQTT link closed");
    }
}

/// Subscribe to commands and publish the birth message
async fn announce(client: AsyncClient, prefix: String) {
    let filters = COMMAND_TOPICS
        .iter()
        .map(|topic| SubscribeFilter::new(full_topic(&prefix, topic), QoS::AtMostOnce));
    if let Err(e) = client.subscribe_many(filters).await {
        warn!("Subscribing to command topics failed: {}", e);
    }
    if let Err(e) = client
        .publish(full_topic(&prefix, STATUS_TOPIC), QoS::AtLeastOnce, true, "online")
        .await
    {
        warn!("Publishing online status failed: {}", e);
    }
}

/// Forward status events to the broker until shutdown
async fn publish_events(
    client: AsyncClient,
    prefix: String,
    mut rx: broadcast::Receiver<StatusEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => {
                    let topic = full_topic(&prefix, &event.topic());
                    let payload = event.payload();
                    debug!("Send to topic {}: {}", topic, payload);
                    if let Err(e) = client.publish(topic, QoS::AtMostOnce, true, payload).await {
                        warn!("Publish failed: {}", e);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Status publisher lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
    debug!("Status publisher stopped");
}
