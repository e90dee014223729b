//! Progress tracking for archive transfers
//!
//! The receive loop reports each frame's length over an unbounded channel and
//! never waits on rendering. [`ProgressSink`] owns the receiving side in its
//! own task and keeps the authoritative running total.

use crate::error::{Phase, PullError, Result};
use crate::logging::Logger;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RENDER_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    transferred: u64,
    frames: u64,
    start_time: Instant,
    last_update: Instant,
    last_transferred: u64,
    output: Logger,
    operation_name: String,
}

impl ProgressTracker {
    pub fn new(output: Logger, operation_name: String) -> Self {
        Self {
            transferred: 0,
            frames: 0,
            start_time: Instant::now(),
            last_update: Instant::now(),
            last_transferred: 0,
            output,
            operation_name,
        }
    }

    /// Account one received frame and redraw at most every [`RENDER_INTERVAL`]
    pub fn update(&mut self, frame_len: u64) {
        self.transferred += frame_len;
        self.frames += 1;

        let now = Instant::now();
        let since_last = now.duration_since(self.last_update);
        if since_last < RENDER_INTERVAL {
            return;
        }

        let speed = rate(self.transferred - self.last_transferred, since_last);
        self.output
            .live_progress(&self.operation_name, self.transferred, speed);
        self.last_update = now;
        self.last_transferred = self.transferred;
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Close the live line and report the final total
    pub fn finish(&self) -> TransferTotals {
        let elapsed = self.start_time.elapsed();
        let totals = TransferTotals {
            bytes: self.transferred,
            frames: self.frames,
            elapsed,
        };

        if self.frames > 0 {
            self.output.live_progress(
                &self.operation_name,
                self.transferred,
                rate(self.transferred, elapsed),
            );
            self.output.progress_done();
        }
        self.output.verbose(&format!(
            "{}: {} in {} frames over {} (avg speed: {})",
            self.operation_name,
            self.output.format_size(totals.bytes),
            totals.frames,
            self.output.format_duration(elapsed),
            self.output.format_speed(rate(totals.bytes, elapsed))
        ));
        totals
    }
}

fn rate(bytes: u64, over: Duration) -> u64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        bytes
    }
}

/// Final accounting produced once the sink has drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTotals {
    pub bytes: u64,
    pub frames: u64,
    pub elapsed: Duration,
}

/// Background task draining frame lengths into a [`ProgressTracker`]
pub struct ProgressSink {
    handle: JoinHandle<TransferTotals>,
}

impl ProgressSink {
    /// Spawn the sink task. Dropping every sender ends it.
    pub fn spawn(output: Logger, operation_name: String) -> (mpsc::UnboundedSender<u64>, Self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let handle = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new(output, operation_name);
            while let Some(frame_len) = rx.recv().await {
                tracker.update(frame_len);
            }
            tracker.finish()
        });
        (tx, Self { handle })
    }

    /// Wait until every reported frame has been accounted
    pub async fn drain(self) -> Result<TransferTotals> {
        self.handle
            .await
            .map_err(|e| PullError::protocol(Phase::Receive, format!("progress sink failed: {}", e)))
    }
}
