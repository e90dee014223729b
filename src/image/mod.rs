//! Image addressing, archive handling, and the local image store
//!
//! - [`coordinate`] parses `<server-host:port>/<namespace>/<name>` arguments
//! - [`archive`] wraps completed transfers as `docker-archive:` references
//! - [`policy`] holds the trust policies evaluated before a commit
//! - [`store`] and [`commit`] make a pulled archive the current image of a slot

pub mod archive;
pub mod commit;
pub mod coordinate;
pub mod digest;
pub mod policy;
pub mod store;

pub use archive::{ArchiveKind, ArchiveSummary, LocalArchiveReference};
pub use commit::CommitEngine;
pub use coordinate::{Coordinate, DestinationSlot};
pub use digest::DigestUtils;
pub use policy::{InsecureAcceptAnything, Reject, TrustPolicy};
pub use store::{CommitReport, LocalImageStore, StoredImage};
