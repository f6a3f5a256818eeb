use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use std::{
    io::Read,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::{
    frame::FrameReader,
    pipeline::Pipeline,
    relay::{OutputRelay, DEFAULT_FIFO_PATH},
    snapshot::{SnapshotPublisher, DEFAULT_SNAPSHOT_PATH},
    RelayError,
};

/// Default number of accepted lines between snapshots
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 20;
/// Sleep between polls when no complete line is available
const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Seconds between status log lines
const STATUS_INTERVAL: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
/// Where accepted lines and snapshots go
pub struct RelayOptions {
    /// FIFO receiving the relayed sentences
    pub fifo_path: PathBuf,
    /// Snapshot document location
    pub snapshot_path: PathBuf,
    /// Accepted lines between snapshots
    pub snapshot_every: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            fifo_path: PathBuf::from(DEFAULT_FIFO_PATH),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Shared stop flag, checked once per loop iteration
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The ingest loop: frame, validate, extract, classify, relay, snapshot
pub struct Runner<R: ?Sized> {
    frames: FrameReader<R>,
    pipeline: Pipeline,
    relay: OutputRelay,
    publisher: SnapshotPublisher,
    snapshot_every: u64,
    accepted: u64,
    last_status: Option<DateTime<Utc>>,
}

impl<R: Read + ?Sized> Runner<R> {
    /// Assemble a runner; a snapshot is published every `snapshot_every` accepted lines
    pub fn new(
        frames: FrameReader<R>,
        pipeline: Pipeline,
        relay: OutputRelay,
        publisher: SnapshotPublisher,
        snapshot_every: u64,
    ) -> Self {
        Self {
            frames,
            pipeline,
            relay,
            publisher,
            snapshot_every: snapshot_every.max(1),
            accepted: 0,
            last_status: None,
        }
    }

    /// Assemble a runner from options, creating the FIFO if needed
    pub fn with_options(
        frames: FrameReader<R>,
        pipeline: Pipeline,
        opts: &RelayOptions,
    ) -> Result<Self, RelayError> {
        let mut relay = OutputRelay::new(&opts.fifo_path);
        relay.setup()?;
        Ok(Self::new(
            frames,
            pipeline,
            relay,
            SnapshotPublisher::new(&opts.snapshot_path),
            opts.snapshot_every,
        ))
    }

    /// Processing state
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Output relay
    pub fn relay(&self) -> &OutputRelay {
        &self.relay
    }

    /// Snapshot publisher
    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    /// Lines accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Run one raw line through the chain. Returns whether it was accepted.
    pub fn handle_line(&mut self, raw: &str, now: DateTime<Utc>) -> bool {
        let Some(sentence) = self.pipeline.process_line(raw, now) else {
            return false;
        };
        self.relay.write_line(sentence.line());
        self.accepted += 1;
        if self.accepted % self.snapshot_every == 0 {
            let doc = self.pipeline.snapshot(self.relay.stats(), now);
            self.publisher.publish(&doc);
        }
        true
    }

    /// Poll the source once. Returns `Ok(false)` when no line was available.
    pub fn step(&mut self, now: DateTime<Utc>) -> Result<bool, RelayError> {
        match self.frames.poll_line()? {
            Some(line) => {
                self.handle_line(&line, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn log_status(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_status {
            if now - last < ChronoDuration::seconds(STATUS_INTERVAL) {
                return;
            }
        }
        self.last_status = Some(now);
        let fix = self.pipeline.position();
        let tally = self.pipeline.satellites().tally_at(now);
        info!(
            "Sats={} Q={} HDOP={} NMEA_out={} TILT={:.1} LOS={} MP={} NLOS={}",
            fix.satellites,
            fix.quality,
            fix.hdop,
            self.relay.stats().relayed,
            self.pipeline.attitude().angle,
            tally.los,
            tally.multipath,
            tally.nlos
        );
    }

    /// Loop until `token` is cancelled or the source fails; the relay is closed either way
    pub fn run(&mut self, token: &CancelToken) -> Result<(), RelayError> {
        let res = loop {
            if token.is_cancelled() {
                info!("Stop requested");
                break Ok(());
            }
            let now = Utc::now();
            match self.step(now) {
                Ok(true) => {}
                Ok(false) => thread::sleep(IDLE_SLEEP),
                Err(e) => break Err(e),
            }
            self.log_status(now);
        };
        if let Err(e) = &res {
            warn!("Source failed: {}", e);
        }
        self.relay.close();
        res
    }
}
