//! Receive loop for one archive transfer

use crate::config::Credential;
use crate::error::handlers::IoErrorHandler;
use crate::error::{Phase, PullError, Result};
use crate::image::archive::LocalArchiveReference;
use crate::image::coordinate::Coordinate;
use crate::logging::Logger;
use crate::transfer::progress::{ProgressSink, TransferTotals};
use crate::transfer::proto::Header;
use crate::transfer::source::{FrameStream, ImageSource};
use crate::workspace::{TempFile, TempWorkspace};
use futures::StreamExt;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

const PROGRESS_LABEL: &str = "Pulling";

/// A fully received archive, kept on disk until this value is released or dropped
#[derive(Debug)]
pub struct PulledArchive {
    reference: LocalArchiveReference,
    file: TempFile,
    totals: TransferTotals,
}

impl PulledArchive {
    pub fn reference(&self) -> &LocalArchiveReference {
        &self.reference
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn totals(&self) -> TransferTotals {
        self.totals
    }

    /// Remove the archive from the workspace
    pub fn release(mut self) {
        self.file.release();
    }
}

pub struct TransferClient {
    output: Logger,
}

impl TransferClient {
    pub fn new(output: Logger) -> Self {
        Self { output }
    }

    /// Request the image at `coordinate` from `source` and write it into a
    /// fresh file in `workspace`.
    ///
    /// On any error the partially written file has already been removed when
    /// this returns.
    pub async fn pull(
        &self,
        source: &mut dyn ImageSource,
        coordinate: &Coordinate,
        credential: &Credential,
        workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PulledArchive> {
        let header = Header {
            name: coordinate.name().to_string(),
            namespace: coordinate.namespace().to_string(),
            token: credential.token().to_string(),
        };

        self.output.verbose(&format!(
            "Requesting {}/{} from {}",
            header.namespace,
            header.name,
            coordinate.server()
        ));
        let frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PullError::cancelled(Phase::StreamOpen)),
            opened = source.open(header) => opened?,
        };

        let mut temp = workspace.temp_file()?;
        self.output
            .detail(&format!("Writing to {}", temp.path().display()));

        let (progress, sink) = ProgressSink::spawn(self.output.clone(), PROGRESS_LABEL.to_string());
        let received = self.receive(frames, &mut temp, &progress, cancel).await;
        drop(progress);
        let totals = match (received, sink.drain().await) {
            (Ok(written), Ok(totals)) => {
                if written != totals.bytes {
                    temp.release();
                    return Err(PullError::protocol(
                        Phase::Receive,
                        format!("wrote {} bytes but accounted {}", written, totals.bytes),
                    ));
                }
                totals
            }
            (Err(e), _) | (Ok(_), Err(e)) => {
                temp.release();
                return Err(e);
            }
        };

        let reference = match LocalArchiveReference::from_completed_file(temp.path()) {
            Ok(reference) => reference,
            Err(e) => {
                temp.release();
                return Err(e);
            }
        };

        self.output.verbose(&format!(
            "Pulled {} ({}) in {}",
            coordinate,
            self.output.format_size(totals.bytes),
            self.output.format_duration(totals.elapsed)
        ));
        Ok(PulledArchive {
            reference,
            file: temp,
            totals,
        })
    }

    async fn receive(
        &self,
        mut frames: FrameStream,
        temp: &mut TempFile,
        progress: &UnboundedSender<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let file = temp
            .take_file()
            .ok_or_else(|| PullError::Storage("temp file handle already taken".to_string()))?;
        let mut writer = BufWriter::new(tokio::fs::File::from_std(file));
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PullError::cancelled(Phase::Receive)),
                next = frames.next() => next,
            };
            let Some(frame) = next else {
                break;
            };
            let frame = frame?;

            writer
                .write_all(&frame)
                .await
                .map_err(|e| IoErrorHandler::write(&e, "error writing frame"))?;
            written += frame.len() as u64;
            // the sink only goes away once we drop the sender
            let _ = progress.send(frame.len() as u64);
        }

        writer
            .flush()
            .await
            .map_err(|e| IoErrorHandler::write(&e, "error flushing archive"))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| IoErrorHandler::write(&e, "error syncing archive"))?;

        Ok(written)
    }
}
