//! kubectl-image library
//!
//! Pulls image archives from a cluster-resident image service over a TLS
//! gRPC stream and commits them into a local content-addressed image store.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod transfer;
pub mod workspace;

pub use config::{ClusterConfig, ConfigProvider, Credential, KubeconfigProvider, StaticConfigProvider};
pub use error::{Phase, PullError, Result};
pub use logging::Logger;
pub use pipeline::Pipeline;
