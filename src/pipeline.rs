//! End-to-end `pull`: resolve, authenticate, transfer, commit

use crate::config::{ConfigProvider, load_credential};
use crate::error::{Phase, PullError, Result};
use crate::image::commit::CommitEngine;
use crate::image::coordinate::Coordinate;
use crate::image::policy::TrustPolicy;
use crate::image::store::{LocalImageStore, StoredImage};
use crate::logging::Logger;
use crate::transfer::client::TransferClient;
use crate::transfer::source::Dialer;
use crate::workspace::TempWorkspace;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Pipeline {
    config_provider: Box<dyn ConfigProvider>,
    dialer: Box<dyn Dialer>,
    engine: CommitEngine,
    temp_root: PathBuf,
    output: Logger,
}

impl Pipeline {
    pub fn new(
        config_provider: Box<dyn ConfigProvider>,
        dialer: Box<dyn Dialer>,
        store: LocalImageStore,
        policy: Arc<dyn TrustPolicy>,
        temp_root: PathBuf,
        output: Logger,
    ) -> Self {
        Self {
            config_provider,
            dialer,
            engine: CommitEngine::new(store, policy, output.clone()),
            temp_root,
            output,
        }
    }

    /// Pull the image named by `coordinate_arg` and make it the current
    /// content of its destination slot.
    ///
    /// The temp workspace and everything in it is gone when this returns,
    /// whatever the outcome. The only success line is printed once the
    /// commit has gone through.
    pub async fn run(&self, coordinate_arg: &str, cancel: &CancellationToken) -> Result<StoredImage> {
        let coordinate = Coordinate::parse(coordinate_arg)?;
        self.output.info(&format!("Pulling {}", coordinate));

        self.output.subsection("Loading credentials");
        let (credential, cluster) = load_credential(self.config_provider.as_ref())?;
        self.output
            .verbose(&format!("Using credentials from {}", cluster.source));
        if cancel.is_cancelled() {
            return Err(PullError::cancelled(Phase::Credentials));
        }

        let workspace = TempWorkspace::create(&self.temp_root)?;
        self.output
            .detail(&format!("Workspace: {}", workspace.path().display()));

        self.output.subsection("Transferring archive");
        let mut source = self
            .dialer
            .dial(coordinate.server(), cluster.ca_pem.as_deref(), cancel)
            .await?;
        let pulled = TransferClient::new(self.output.clone())
            .pull(source.as_mut(), &coordinate, &credential, &workspace, cancel)
            .await?;
        drop(source);
        if cancel.is_cancelled() {
            pulled.release();
            return Err(PullError::cancelled(Phase::Commit));
        }

        self.output.subsection("Committing to local store");
        let committed = self.engine.commit(&coordinate, pulled.reference()).await;
        pulled.release();
        let report = committed?;

        let image = report.image;
        self.output.summary_kv(
            "Stored image",
            &[
                ("Slot", format!("{}/{}", image.namespace, image.name)),
                ("Digest", image.digest.clone()),
                ("Size", self.output.format_size(image.size_bytes)),
                ("Tags", image.repo_tags.join(", ")),
                ("Policy", image.policy.clone()),
            ],
        );
        if let Some(previous) = report.replaced.filter(|d| *d != image.digest) {
            self.output.verbose(&format!("Replaced {}", previous));
        }
        self.output.success(&format!(
            "Image {}/{} stored as {} in {}",
            image.namespace,
            image.name,
            image.digest,
            self.output.format_duration(self.output.elapsed())
        ));
        Ok(image)
    }

    pub fn store(&self) -> &LocalImageStore {
        self.engine.store()
    }
}
