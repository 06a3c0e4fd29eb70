// src/region_subscriber.rs
//
// Consumes region-update envelopes from MQTT and swaps them into the
// RegionStore. Parsing happens before the store is touched; a payload
// that fails to parse leaves the previous set in place.

use crate::pipeline::PipelineMetrics;
use crate::region_store::RegionStore;
use crate::types::{MqttConfig, Region, RegionUpdate};
use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Upper bound on flushing UNSUBSCRIBE/DISCONNECT at shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RegionSubscriber {
    store: Arc<RegionStore>,
    metrics: PipelineMetrics,
}

impl RegionSubscriber {
    pub fn new(store: Arc<RegionStore>, metrics: PipelineMetrics) -> Self {
        Self { store, metrics }
    }

    /// Parse one payload and, if valid, replace the store's region set.
    /// Returns the new store version.
    pub fn apply(&self, payload: &[u8]) -> Result<u64> {
        let update = match RegionUpdate::parse(payload) {
            Ok(update) => update,
            Err(e) => {
                self.metrics.inc(&self.metrics.updates_rejected);
                warn!(
                    "❌ Ignoring region update ({} bytes): {:#}",
                    payload.len(),
                    e
                );
                return Err(e);
            }
        };

        let event = update.event.clone();
        let timestamp = update.timestamp.clone();
        let regions = update.into_regions();
        log_regions(&event, &timestamp, &regions);

        let count = regions.len();
        let version = self.store.replace(regions);
        self.metrics.inc(&self.metrics.updates_accepted);
        info!("✓ Region set v{} active ({} region(s))", version, count);
        Ok(version)
    }

    /// Drive the MQTT event loop until `cancel` fires.
    ///
    /// rumqttc reconnects on the next `poll()` after an error, so transport
    /// failures only cost a pause. The subscription is (re)issued on every
    /// ConnAck since a clean session forgets it.
    pub async fn run(self, config: MqttConfig, cancel: CancellationToken) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let retry_delay = Duration::from_millis(config.reconnect_delay_ms);

        info!(
            "🔄 Connecting MQTT {}:{} (topic: {})",
            config.host, config.port, config.topic
        );

        let mut connected = false;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected = true;
                    info!("✅ MQTT connected, subscribing to {}", config.topic);
                    if let Err(e) = client.try_subscribe(config.topic.as_str(), QoS::AtLeastOnce) {
                        warn!("Subscribe request failed: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("📥 Message on {}", publish.topic);
                    // Errors are logged and counted inside apply
                    let _ = self.apply(&publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    connected = false;
                    warn!("⚠️  MQTT connection error: {}. Retrying...", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                }
            }
        }

        if connected {
            close_session(&client, &mut eventloop, &config.topic).await;
        }
        info!("MQTT subscriber stopped");
    }
}

/// Queue UNSUBSCRIBE and DISCONNECT, then keep polling so they actually
/// reach the broker. Requests only move when the event loop is driven.
async fn close_session(client: &AsyncClient, eventloop: &mut EventLoop, topic: &str) {
    if let Err(e) = client.try_unsubscribe(topic) {
        debug!("Unsubscribe skipped: {}", e);
    }
    if let Err(e) = client.try_disconnect() {
        debug!("Disconnect skipped: {}", e);
        return;
    }

    let flushed = tokio::time::timeout(CLOSE_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT closed while disconnecting: {}", e);
                    return false;
                }
            }
        }
    })
    .await;

    match flushed {
        Ok(true) => info!("MQTT unsubscribed and disconnected"),
        Ok(false) => {}
        Err(_) => warn!("MQTT disconnect not confirmed within {:?}", CLOSE_TIMEOUT),
    }
}

fn log_regions(event: &str, timestamp: &str, regions: &[Region]) {
    info!(
        "📥 Region update: event={} timestamp={}",
        if event.is_empty() { "N/A" } else { event },
        if timestamp.is_empty() { "N/A" } else { timestamp }
    );

    if regions.is_empty() {
        info!("No regions in update, clearing overlay");
        return;
    }

    for region in regions {
        match region.bounding_box() {
            Some((min, max)) => debug!(
                "  - {}: {} points, bbox ({:.4}, {:.4})-({:.4}, {:.4}), color {}, visible {}",
                region.name,
                region.points.len(),
                min[0],
                min[1],
                max[0],
                max[1],
                region.color,
                region.visible
            ),
            None => debug!("  - {}: no points", region.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn subscriber() -> (RegionSubscriber, Arc<RegionStore>, PipelineMetrics) {
        let store = Arc::new(RegionStore::new());
        let metrics = PipelineMetrics::new();
        (
            RegionSubscriber::new(store.clone(), metrics.clone()),
            store,
            metrics,
        )
    }

    const TWO_REGIONS: &[u8] = br##"{
        "event": "polygons_updated",
        "timestamp": "2025-06-01 10:00:00",
        "polygons": [
            {"name": "Zone A", "points": [[0.1,0.1],[0.4,0.1],[0.4,0.4]], "color": "#ff0000"},
            {"name": "Zone B", "points": [[0.5,0.5],[0.9,0.5],[0.9,0.9],[0.5,0.9]],
             "color": "#00ff00", "label": "dock", "showOnCamera": true}
        ]
    }"##;

    #[test]
    fn test_valid_update_replaces_store_in_order() {
        let (sub, store, metrics) = subscriber();
        let version = sub.apply(TWO_REGIONS).unwrap();
        assert_eq!(version, 1);

        let expected = RegionUpdate::parse(TWO_REGIONS).unwrap().into_regions();
        assert_eq!(*store.snapshot().regions, expected);
        assert_eq!(store.snapshot().regions[0].name, "Zone A");
        assert_eq!(metrics.summary().updates_accepted, 1);
    }

    #[test]
    fn test_malformed_update_keeps_prior_state() {
        let (sub, store, metrics) = subscriber();
        sub.apply(TWO_REGIONS).unwrap();

        assert!(sub.apply(b"{\"polygons\": [{\"name\": \"x\"").is_err());
        assert!(sub.apply(br#"{"polygons": [{"name": "x", "points": "bad"}]}"#).is_err());
        assert!(sub.apply(&[0xff, 0xfe, 0x00]).is_err());

        let snap = store.snapshot();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.len(), 2);
        assert_eq!(metrics.summary().updates_rejected, 3);
    }

    #[test]
    fn test_empty_and_absent_polygons_clear_store() {
        let (sub, store, _) = subscriber();
        sub.apply(TWO_REGIONS).unwrap();

        assert_eq!(sub.apply(br#"{"event": "x", "polygons": []}"#).unwrap(), 2);
        assert!(store.snapshot().is_empty());

        sub.apply(TWO_REGIONS).unwrap();
        assert_eq!(sub.apply(br#"{"event": "x"}"#).unwrap(), 4);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_degenerate_regions_are_stored_not_rejected() {
        let (sub, store, _) = subscriber();
        sub.apply(br#"{"polygons": [{"name": "line", "points": [[0,0],[1,1]]}]}"#)
            .unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (sub, _, _) = subscriber();
        let cancel = CancellationToken::new();
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay_ms: 50,
            ..MqttConfig::default()
        };

        let handle = tokio::spawn(sub.run(config, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscriber did not stop")
            .unwrap();
    }

    const SUBSCRIBE: u8 = 0x82;
    const UNSUBSCRIBE: u8 = 0xA2;
    const DISCONNECT: u8 = 0xE0;

    /// Reads one MQTT packet and returns its first header byte.
    async fn read_packet(stream: &mut TcpStream) -> Option<u8> {
        let header = stream.read_u8().await.ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.ok()?;
        Some(header)
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_and_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (subscribed_tx, subscribed_rx) = oneshot::channel();

        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_packet(&mut stream).await.map(|h| h >> 4), Some(1));
            // CONNACK, session not present, accepted
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let mut subscribed_tx = Some(subscribed_tx);
            let mut seen = Vec::new();
            while let Some(header) = read_packet(&mut stream).await {
                seen.push(header);
                if header == SUBSCRIBE {
                    if let Some(tx) = subscribed_tx.take() {
                        let _ = tx.send(());
                    }
                }
                if header == DISCONNECT {
                    break;
                }
            }
            seen
        });

        let (sub, _, _) = subscriber();
        let cancel = CancellationToken::new();
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..MqttConfig::default()
        };
        let handle = tokio::spawn(sub.run(config, cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), subscribed_rx)
            .await
            .expect("never subscribed")
            .unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscriber did not stop")
            .unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker never saw the session close")
            .unwrap();

        let unsubscribe = seen.iter().position(|&h| h == UNSUBSCRIBE);
        let disconnect = seen.iter().position(|&h| h == DISCONNECT);
        assert!(unsubscribe.is_some(), "packets after CONNACK: {:02x?}", seen);
        assert!(disconnect.is_some(), "packets after CONNACK: {:02x?}", seen);
        assert!(unsubscribe < disconnect);
    }
}
