//! Trust policies applied when committing a pulled archive

use crate::error::{PullError, Result};
use crate::image::archive::LocalArchiveReference;
use crate::image::coordinate::DestinationSlot;

/// Decides whether fetched content may enter the local store
pub trait TrustPolicy: Send + Sync {
    /// Stable name recorded alongside the committed image
    fn name(&self) -> &'static str;

    fn evaluate(&self, slot: &DestinationSlot, archive: &LocalArchiveReference) -> Result<()>;
}

/// Accepts every archive without cryptographic verification.
///
/// The image service is cluster-internal and the channel is already
/// authenticated with the cluster token, so this is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureAcceptAnything;

impl TrustPolicy for InsecureAcceptAnything {
    fn name(&self) -> &'static str {
        "insecureAcceptAnything"
    }

    fn evaluate(&self, _slot: &DestinationSlot, _archive: &LocalArchiveReference) -> Result<()> {
        Ok(())
    }
}

/// Refuses every archive
#[derive(Debug, Clone, Copy, Default)]
pub struct Reject;

impl TrustPolicy for Reject {
    fn name(&self) -> &'static str {
        "reject"
    }

    fn evaluate(&self, slot: &DestinationSlot, archive: &LocalArchiveReference) -> Result<()> {
        Err(PullError::Commit(format!(
            "trust policy '{}' rejected {} for {}",
            self.name(),
            archive,
            slot
        )))
    }
}
