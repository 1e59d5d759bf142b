use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use relay_core::Packet;

use crate::handler::{HandlerResponse, HandlerResult, PacketHandler};

/// Liveness probe handler.
///
/// Subscribes to `sap.heartbeat.created` and pings the monitoring URL
/// carried in the packet, so an external uptime checker observes the
/// whole publish/consume path working end to end.
pub struct HeartbeatHandler {
    packet: Packet,
    client: reqwest::Client,
}

impl HeartbeatHandler {
    pub fn new() -> Self {
        HeartbeatHandler {
            packet: Packet::signal("sap.heartbeat.created", &["heartbeat_url"]),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HeartbeatHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketHandler for HeartbeatHandler {
    fn name(&self) -> &str {
        "relay.Heartbeat"
    }

    fn packet(&self) -> &Packet {
        &self.packet
    }

    async fn handle(
        &self,
        _identifier: Option<String>,
        kwargs: &Map<String, Value>,
    ) -> HandlerResult {
        let url = kwargs
            .get("heartbeat_url")
            .and_then(Value::as_str)
            .ok_or_else(|| "heartbeat packet is missing 'heartbeat_url'".to_string())?;

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|err| format!("heartbeat ping failed: {err}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "heartbeat endpoint returned {}",
                response.status()
            ));
        }

        debug!(url, "Heartbeat delivered");
        Ok(HandlerResponse::ok())
    }
}
