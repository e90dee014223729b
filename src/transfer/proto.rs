//! Bindings for `proto/imageio.proto`
//!
//! Maintained by hand in the shape `tonic-build` emits, so the crate builds
//! without `protoc`. Keep field tags in sync with the `.proto` file.

use std::fmt;

/// Addressing and authentication for one transfer
#[derive(Clone, PartialEq, ::prost::Message)]
#[prost(skip_debug)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub token: ::prost::alloc::string::String,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// One contiguous slice of the image archive
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Chunk {
    #[prost(bytes = "vec", tag = "1")]
    pub content: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Packet {
    #[prost(oneof = "packet::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<packet::Payload>,
}

pub mod packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Header(super::Header),
        #[prost(message, tag = "2")]
        Chunk(super::Chunk),
    }
}

impl Packet {
    pub fn header(header: Header) -> Self {
        Self {
            payload: Some(packet::Payload::Header(header)),
        }
    }

    pub fn chunk(content: Vec<u8>) -> Self {
        Self {
            payload: Some(packet::Payload::Chunk(Chunk { content })),
        }
    }
}

pub mod image_io_service_client {
    #![allow(clippy::let_unit_value, clippy::needless_borrows_for_generic_args)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct ImageIoServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> ImageIoServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        pub async fn pull(
            &mut self,
            request: impl tonic::IntoRequest<super::Packet>,
        ) -> std::result::Result<tonic::Response<tonic::codec::Streaming<super::Packet>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/pb.ImageIOService/Pull");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("pb.ImageIOService", "Pull"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}
