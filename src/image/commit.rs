use crate::error::{PullError, Result};
use crate::image::archive::LocalArchiveReference;
use crate::image::coordinate::Coordinate;
use crate::image::policy::TrustPolicy;
use crate::image::store::{CommitReport, LocalImageStore};
use crate::logging::Logger;
use std::sync::Arc;

/// Applies a trust policy and hands accepted archives to the store
pub struct CommitEngine {
    store: LocalImageStore,
    policy: Arc<dyn TrustPolicy>,
    output: Logger,
}

impl CommitEngine {
    pub fn new(store: LocalImageStore, policy: Arc<dyn TrustPolicy>, output: Logger) -> Self {
        Self {
            store,
            policy,
            output,
        }
    }

    pub fn store(&self) -> &LocalImageStore {
        &self.store
    }

    pub fn policy(&self) -> &dyn TrustPolicy {
        self.policy.as_ref()
    }

    /// Make `archive` the current image for the coordinate's slot
    pub async fn commit(
        &self,
        coordinate: &Coordinate,
        archive: &LocalArchiveReference,
    ) -> Result<CommitReport> {
        let slot = coordinate.slot();
        self.policy.evaluate(&slot, archive)?;
        self.output.verbose(&format!(
            "Trust policy '{}' accepted {}",
            self.policy.name(),
            archive
        ));

        let store = self.store.clone();
        let policy = Arc::clone(&self.policy);
        let archive = archive.clone();
        let server = coordinate.server().to_string();
        let report = tokio::task::spawn_blocking(move || {
            store.commit(&slot, &archive, policy.as_ref(), Some(server.as_str()))
        })
        .await
        .map_err(|e| PullError::Commit(format!("commit task failed: {}", e)))??;

        for warning in &report.warnings {
            self.output.warning(warning);
        }
        Ok(report)
    }
}
