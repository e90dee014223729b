//! The seams between the transfer loop and the network
//!
//! [`Dialer`] turns a server address into an [`ImageSource`], and an image
//! source turns one envelope into a stream of archive frames. Production code
//! uses the gRPC client over a TLS channel; tests plug in their own.

use crate::error::handlers::StatusErrorHandler;
use crate::error::{Phase, PullError, Result};
use crate::transfer::proto::image_io_service_client::ImageIoServiceClient;
use crate::transfer::proto::{Header, Packet, packet};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// Archive frames in arrival order. The stream ending cleanly means the
/// archive is complete.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>>>;

#[async_trait]
pub trait ImageSource: Send {
    /// Send the envelope and open the response stream
    async fn open(&mut self, header: Header) -> Result<FrameStream>;
}

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establish a connection to `server`, trusting `ca_pem` in addition to
    /// whatever the dialer trusts by default
    async fn dial(
        &self,
        server: &str,
        ca_pem: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ImageSource>>;
}

/// `pb.ImageIOService` client over an established channel
pub struct GrpcImageSource {
    client: ImageIoServiceClient<Channel>,
}

impl GrpcImageSource {
    pub fn new(client: ImageIoServiceClient<Channel>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageSource for GrpcImageSource {
    async fn open(&mut self, header: Header) -> Result<FrameStream> {
        let response = self
            .client
            .pull(Packet::header(header))
            .await
            .map_err(|status| StatusErrorHandler::handle_status(&status, Phase::StreamOpen))?;

        let frames = response.into_inner().map(|item| match item {
            Ok(packet) => frame_from_packet(packet),
            Err(status) => Err(StatusErrorHandler::handle_status(&status, Phase::Receive)),
        });
        Ok(frames.boxed())
    }
}

/// Extract archive bytes from a server packet
pub fn frame_from_packet(packet: Packet) -> Result<Vec<u8>> {
    match packet.payload {
        Some(packet::Payload::Chunk(chunk)) => Ok(chunk.content),
        Some(packet::Payload::Header(_)) => Err(PullError::protocol(
            Phase::Receive,
            "unexpected header packet in response stream",
        )),
        None => Err(PullError::protocol(Phase::Receive, "received empty packet")),
    }
}
