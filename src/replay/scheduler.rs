use crate::classify::{content, sniff_content};
use crate::framing::{write_chunked, FramingError, MonPacket, PacketHeader, HDR_LEN};
use crate::replay::dump::{DumpReader, DumpRecord};
use crate::replay::ReplayError;
use crate::sequence::SequenceCursor;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bytes of content shown in the per-packet diagnostic
const PREVIEW_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Pause before starting over after the end of the dump or a bad record
    pub rewind_pause: Duration,
    /// Pause between a client connecting and the first packet
    pub client_settle: Duration,
    /// How often a long wait for the next packet is reported
    pub progress_interval: Duration,
    /// Limit on each chunked write to the client
    pub io_timeout: Duration,
    /// Stop the session after this many passes over the dump, loop forever if `None`
    pub max_passes: Option<u32>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            rewind_pause: Duration::from_secs(1),
            client_settle: Duration::from_millis(100),
            progress_interval: Duration::from_millis(500),
            io_timeout: Duration::from_secs(3),
            max_passes: None,
        }
    }
}

/// Why [`ReplayScheduler::run_session`] returned
#[derive(Debug)]
pub enum SessionEnd {
    /// Writing to the client failed, it should be replaced by the next one
    ClientGone(FramingError),
    /// The configured number of passes was played
    PassesDone,
    Shutdown,
}

/// Plays the records of a dump at the pace they were captured at
pub struct ReplayScheduler<R> {
    reader: DumpReader<R>,
    settings: ReplaySettings,
    cursor: SequenceCursor,
    /// Timestamp of the first record of the current pass
    baseline: Option<u32>,
    /// When the first record of the current pass was sent
    reference: Option<Instant>,
}

impl<R> ReplayScheduler<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    pub fn new(reader: DumpReader<R>, settings: ReplaySettings) -> Self {
        Self {
            reader,
            settings,
            cursor: SequenceCursor::new(),
            baseline: None,
            reference: None,
        }
    }

    /// Replays the dump to `sink` from the start, looping until the client goes away,
    /// enough passes were played, or `cancel` fires.
    ///
    /// Only errors seeking the dump file are returned as `Err`, bad records just start a new pass.
    pub async fn run_session<W>(
        &mut self,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, ReplayError>
    where
        W: AsyncWrite + Unpin,
    {
        if !pause(self.settings.client_settle, cancel).await {
            return Ok(SessionEnd::Shutdown);
        }
        self.start_pass().await?;
        let mut passes = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(SessionEnd::Shutdown);
            }
            let rec = match self.reader.next_record().await {
                Ok(rec) => rec,
                Err(e) => {
                    if e.is_end_of_dump() {
                        info!("End of dump, starting over");
                    } else {
                        warn!("Bad dump record, starting over: {}", e);
                    }
                    passes += 1;
                    if self.settings.max_passes.map_or(false, |max| passes >= max) {
                        return Ok(SessionEnd::PassesDone);
                    }
                    if !pause(self.settings.rewind_pause, cancel).await {
                        return Ok(SessionEnd::Shutdown);
                    }
                    self.start_pass().await?;
                    continue;
                }
            };
            if rec.is_marker() {
                continue;
            }

            let elapsed = match self.wait_until_due(&rec, cancel).await {
                Some(elapsed) => elapsed,
                None => return Ok(SessionEnd::Shutdown),
            };
            self.describe(elapsed, &rec.frame);
            if let Err(e) = write_chunked(sink, &rec.frame, self.settings.io_timeout).await {
                warn!("Replay client lost: {}", e);
                return Ok(SessionEnd::ClientGone(e));
            }
        }
    }

    async fn start_pass(&mut self) -> Result<(), ReplayError> {
        self.reader.rewind().await?;
        self.baseline = None;
        self.reference = None;
        self.cursor.reset();
        Ok(())
    }

    /// Sleeps until `rec` is due relative to the start of the pass, returns the time since then.
    /// `None` if cancelled while waiting.
    async fn wait_until_due(
        &mut self,
        rec: &DumpRecord,
        cancel: &CancellationToken,
    ) -> Option<Duration> {
        let baseline = *self.baseline.get_or_insert(rec.timestamp_ms);
        let reference = *self.reference.get_or_insert_with(Instant::now);
        // Records older than the first of the pass are sent right away
        let offset = rec.timestamp_ms.saturating_sub(baseline);
        let due = reference + Duration::from_millis(offset as u64);

        let mut next_progress = Instant::now() + self.settings.progress_interval;
        while next_progress < due {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep_until(next_progress) => {}
            }
            debug!(
                "{:7.3}s waiting for packet at {:.3}s",
                reference.elapsed().as_secs_f32(),
                offset as f32 / 1000.0
            );
            next_progress += self.settings.progress_interval;
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep_until(due) => {}
        }
        Some(reference.elapsed())
    }

    /// Logs what is about to be sent. Never prevents sending, even for malformed frames.
    fn describe(&mut self, elapsed: Duration, frame: &[u8]) {
        let hdr = match frame.get(..HDR_LEN).and_then(|h| h.try_into().ok()) {
            Some(hdr) => PacketHeader::from_bytes(hdr),
            None => {
                warn!("Dump record holds {} bytes, too short for a frame", frame.len());
                return;
            }
        };
        let payload = &frame[HDR_LEN..];
        if payload.len() != hdr.payload_len as usize {
            warn!(
                cmd = hdr.cmd,
                "Frame header declares {} payload bytes, record holds {}",
                hdr.payload_len,
                payload.len()
            );
        }
        self.cursor.observe(hdr.seq);

        let pkt = MonPacket::new(hdr.cmd, hdr.seq, payload.to_vec());
        let data = content(&pkt);
        let sniff = sniff_content(&pkt)
            .map(|s| s.to_string())
            .unwrap_or_default();
        info!(
            elapsed = %format!("{:7.3}", elapsed.as_secs_f32()),
            cmd = %hdr.command().label(),
            seq = hdr.seq,
            len = data.len(),
            head = %hex::encode(&data[..usize::min(data.len(), PREVIEW_LEN)]),
            "{}",
            sniff
        );
    }
}

/// Sleeps for `duration`, false if cancelled first
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
