//! Streaming archive transfer from the cluster image service
//!
//! [`channel`] dials the service over TLS, [`proto`] carries the wire
//! contract, [`client`] drives one pull into the temp workspace and
//! [`progress`] renders the running byte count while it happens.

pub mod channel;
pub mod client;
pub mod progress;
pub mod proto;
pub mod source;

pub use channel::{ChannelOptions, SecureChannelFactory};
pub use client::{PulledArchive, TransferClient};
pub use progress::{ProgressSink, ProgressTracker, TransferTotals};
pub use source::{Dialer, FrameStream, GrpcImageSource, ImageSource};
