//! Receive side: classifies every frame on the monitor link and publishes it as telemetry.

use crate::classify::{classify, content, PacketKind, Source};
use crate::framing::{FramingError, MonPacket, MonSocket};
use crate::mavstream::{decode_stream, MavlinkParser};
use crate::sequence::SequenceCursor;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why [`Monitor::run`] returned
#[derive(Debug)]
pub enum MonitorExit {
    /// The link failed or the peer went away, the caller may reconnect
    ConnectionEnded(FramingError),
    /// Cancellation was requested from outside
    Shutdown,
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MonitorStats {
    pub frames: u64,
    pub bytes: u64,
    pub mavlink_messages: u64,
    pub dropped_frames: u64,
    pub sink_failures: u64,
}

pub struct Monitor<S> {
    sink: S,
    cursor: SequenceCursor,
    // MAVLink streams from each side are parsed independently
    parsers: HashMap<Source, MavlinkParser>,
    stats: MonitorStats,
}

impl<S: TelemetrySink> Monitor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            cursor: SequenceCursor::new(),
            parsers: HashMap::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Processes frames from `sock` until the link ends or `cancel` fires.
    ///
    /// Sequence and MAVLink parser state start over on every call.
    pub async fn run<IO>(
        &mut self,
        sock: &mut MonSocket<IO>,
        peer: &str,
        cancel: &CancellationToken,
    ) -> MonitorExit
    where
        IO: AsyncRead + AsyncWrite,
    {
        self.cursor.reset();
        self.parsers.clear();
        self.publish(&TelemetryEvent::status(format!("Connected to {}", peer)));

        loop {
            let pkt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Monitor on {} stopping", peer);
                    return MonitorExit::Shutdown;
                }
                res = sock.read_frame() => match res {
                    Ok(pkt) => pkt,
                    Err(e) => {
                        info!("Monitor link to {} ended: {}", peer, e);
                        return MonitorExit::ConnectionEnded(e);
                    }
                },
            };
            self.handle_packet(&pkt);
        }
    }

    /// Publishes one frame, followed by the MAVLink messages found in it if it is plaintext
    pub fn handle_packet(&mut self, pkt: &MonPacket) {
        self.stats.frames += 1;
        self.stats.bytes += pkt.wire_len() as u64;
        if let Some(gap) = self.cursor.observe(pkt.seq) {
            self.stats.dropped_frames += gap.dropped as u64;
        }

        let (kind, source) = classify(pkt);
        debug!(
            cmd = pkt.cmd,
            seq = pkt.seq,
            len = pkt.payload.len(),
            "Received {} packet from {}",
            kind,
            source
        );
        self.publish(&TelemetryEvent::packet(pkt));

        if kind != PacketKind::PlaintextTelemetry {
            return;
        }
        let data = content(pkt);
        if data.is_empty() {
            return;
        }
        let parser = self.parsers.entry(source).or_default();
        let msgs = decode_stream(parser, data);
        if msgs.is_empty() {
            return;
        }
        debug!("Parsed {} MAVLink messages", msgs.len());
        self.stats.mavlink_messages += msgs.len() as u64;
        if let Some(batch) = TelemetryEvent::mavlink_batch(pkt, source, &msgs) {
            self.publish(&batch);
        }
    }

    fn publish(&mut self, event: &TelemetryEvent) {
        if let Err(e) = self.sink.publish(event) {
            self.stats.sink_failures += 1;
            warn!("Failed to publish telemetry: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Monitor, MonitorExit};
    use crate::classify::IP_AND_UDP_HDR_LEN;
    use crate::framing::{FramingError, MonPacket, MonSocket};
    use crate::mavstream::test::{attitude_v2, heartbeat_v1};
    use crate::telemetry::test::RecordingSink;
    use crate::telemetry::{PacketData, TelemetryEvent};
    use anyhow::Result;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn mavlink_names(ev: &TelemetryEvent) -> Vec<String> {
        match ev {
            TelemetryEvent::Packet(p) => match &p.data {
                PacketData::Mavlink(docs) => docs
                    .iter()
                    .map(|d| {
                        let v: serde_json::Value = serde_json::from_str(d).unwrap();
                        v["message"].as_str().unwrap().to_owned()
                    })
                    .collect(),
                _ => panic!("not a MAVLink batch: {:?}", p),
            },
            _ => panic!("not a packet: {:?}", ev),
        }
    }

    fn packet_type(ev: &TelemetryEvent) -> &str {
        match ev {
            TelemetryEvent::Packet(p) => &p.packet_type,
            TelemetryEvent::Status { .. } => "status",
        }
    }

    #[test_log::test]
    fn plaintext_with_mavlink() {
        let mut mon = Monitor::new(RecordingSink::default());
        let mut payload = heartbeat_v1();
        payload.extend_from_slice(&attitude_v2());
        mon.handle_packet(&MonPacket::new(0u8, 1, payload));

        let events = mon.sink().take();
        assert_eq!(events.len(), 2);
        assert_eq!(packet_type(&events[0]), "plaintext");
        assert_eq!(packet_type(&events[1]), "mavlink");
        assert_eq!(mavlink_names(&events[1]), vec!["HEARTBEAT", "ATTITUDE"]);
        assert_eq!(mon.stats().mavlink_messages, 2);
    }

    #[test_log::test]
    fn packet_mode_skips_ip_header() {
        let mut mon = Monitor::new(RecordingSink::default());
        // A heartbeat hidden inside the IP header must not be found
        let mut payload = heartbeat_v1();
        payload.resize(IP_AND_UDP_HDR_LEN, 0);
        payload.extend_from_slice(&attitude_v2());
        mon.handle_packet(&MonPacket::new(5u8, 1, payload));

        let events = mon.sink().take();
        assert_eq!(events.len(), 2);
        assert_eq!(mavlink_names(&events[1]), vec!["ATTITUDE"]);
    }

    #[test_log::test]
    fn ciphertext_not_decoded() {
        let mut mon = Monitor::new(RecordingSink::default());
        mon.handle_packet(&MonPacket::new(2u8, 1, heartbeat_v1()));
        mon.handle_packet(&MonPacket::new(8u8, 2, vec![]));
        mon.handle_packet(&MonPacket::new(16u8, 3, b"CONNECTED".to_vec()));
        let events = mon.sink().take();
        let types: Vec<_> = events.iter().map(packet_type).collect();
        assert_eq!(types, vec!["ciphertext", "ping", "state"]);
    }

    #[test_log::test]
    fn plaintext_without_mavlink_has_no_batch() {
        let mut mon = Monitor::new(RecordingSink::default());
        mon.handle_packet(&MonPacket::new(1u8, 1, b"just some bytes".to_vec()));
        assert_eq!(mon.sink().take().len(), 1);
    }

    #[test_log::test]
    fn message_split_across_frames() {
        let mut mon = Monitor::new(RecordingSink::default());
        let hb = heartbeat_v1();
        mon.handle_packet(&MonPacket::new(0u8, 1, hb[..7].to_vec()));
        mon.handle_packet(&MonPacket::new(0u8, 2, hb[7..].to_vec()));
        let events = mon.sink().take();
        assert_eq!(events.len(), 3);
        assert_eq!(mavlink_names(&events[2]), vec!["HEARTBEAT"]);
    }

    #[test_log::test]
    fn sink_failures_do_not_stop_processing() {
        let sink = RecordingSink::default();
        sink.offline.store(true, Ordering::Release);
        let mut mon = Monitor::new(sink);
        mon.handle_packet(&MonPacket::new(0u8, 1, heartbeat_v1()));
        mon.handle_packet(&MonPacket::new(0u8, 5, heartbeat_v1()));
        let stats = mon.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.sink_failures, 4);
        assert_eq!(stats.dropped_frames, 3);
        assert_eq!(stats.mavlink_messages, 2);
    }

    #[test_log::test(tokio::test)]
    async fn run_until_peer_closes() -> Result<()> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut tx = MonSocket::new(client);
        let mut rx = MonSocket::new(server);
        tx.write_frame(MonPacket::new(3u8, 0, vec![1, 2, 3])).await?;
        tx.write_frame(MonPacket::new(0u8, 1, heartbeat_v1())).await?;
        drop(tx);

        let sink = Arc::new(RecordingSink::default());
        let mut mon = Monitor::new(sink.clone());
        let exit = mon.run(&mut rx, "test", &CancellationToken::new()).await;
        assert!(matches!(
            exit,
            MonitorExit::ConnectionEnded(FramingError::ConnectionClosed)
        ));

        let events = sink.take();
        assert_eq!(events[0], TelemetryEvent::status("Connected to test"));
        let types: Vec<_> = events[1..].iter().map(packet_type).collect();
        assert_eq!(types, vec!["ciphertext", "plaintext", "mavlink"]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn run_until_cancelled() -> Result<()> {
        let (_client, server) = tokio::io::duplex(1024);
        let mut rx = MonSocket::new(server);
        let cancel = CancellationToken::new();
        let mut mon = Monitor::new(RecordingSink::default());

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let exit = mon.run(&mut rx, "test", &cancel).await;
        assert!(matches!(exit, MonitorExit::Shutdown));
        Ok(())
    }
}
