//! Standardized conversion of transport and I/O failures into phase-tagged errors

use crate::error::{Phase, PullError};
use std::error::Error as StdError;
use tonic::Code;

/// Render an error together with every `source()` below it.
///
/// Transport errors from tonic/hyper carry the useful detail (the rustls
/// alert, the refused connection) several levels down the chain.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        current = cause.source();
    }
    rendered
}

/// Handler for gRPC status values returned by the image service
pub struct StatusErrorHandler;

impl StatusErrorHandler {
    /// Map a status to a protocol error tagged with the phase it interrupted
    pub fn handle_status(status: &tonic::Status, phase: Phase) -> PullError {
        let detail = status.message();
        let message = match status.code() {
            Code::Unauthenticated => format!("server rejected the token: {}", detail),
            Code::PermissionDenied => format!("access to the image denied: {}", detail),
            Code::NotFound => format!("image not found on server: {}", detail),
            Code::Unavailable => format!("image service unavailable: {}", detail),
            Code::DeadlineExceeded => format!("transfer timed out: {}", detail),
            Code::Cancelled => format!("stream cancelled by peer: {}", detail),
            Code::ResourceExhausted => format!("frame exceeds message limits: {}", detail),
            Code::Unimplemented => format!("server does not implement image pull: {}", detail),
            code => format!("{:?}: {}", code, detail),
        };

        PullError::protocol(phase, message)
    }
}

/// Handler for channel establishment failures
pub struct TransportErrorHandler;

impl TransportErrorHandler {
    pub fn handle_dial_error(error: &(dyn StdError + 'static), server: &str) -> PullError {
        let chain = error_chain(error);
        let message = if chain.contains("certificate") || chain.contains("UnknownIssuer") {
            format!(
                "TLS certificate verification failed for {}: {} (use --insecure to skip verification)",
                server, chain
            )
        } else if chain.contains("Connection refused") || chain.contains("connection refused") {
            format!("connection refused by {}: {}", server, chain)
        } else if chain.contains("timed out") {
            format!("timed out connecting to {}: {}", server, chain)
        } else {
            format!("failed to connect to {}: {}", server, chain)
        };

        PullError::Connection(message)
    }
}

/// Handler for local file-system failures
pub struct IoErrorHandler;

impl IoErrorHandler {
    pub fn storage(error: &std::io::Error, context: &str) -> PullError {
        PullError::Storage(format!("{}: {}", context, error))
    }

    pub fn write(error: &std::io::Error, context: &str) -> PullError {
        PullError::protocol(Phase::Write, format!("{}: {}", context, error))
    }

    pub fn commit(error: &std::io::Error, context: &str) -> PullError {
        PullError::Commit(format!("{}: {}", context, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Wrapper(io::Error);

    impl std::fmt::Display for Wrapper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("transport error")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"));
        assert_eq!(error_chain(&err), "transport error: Connection refused");
    }

    #[test]
    fn test_dial_error_is_connection_error() {
        let err = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"));
        let mapped = TransportErrorHandler::handle_dial_error(&err, "svc:443");
        assert!(matches!(mapped, PullError::Connection(ref m) if m.contains("refused by svc:443")));
    }

    #[test]
    fn test_status_mapping_keeps_phase() {
        let status = tonic::Status::unauthenticated("bad token");
        let mapped = StatusErrorHandler::handle_status(&status, Phase::StreamOpen);
        match mapped {
            PullError::Protocol { phase, message } => {
                assert_eq!(phase, Phase::StreamOpen);
                assert!(message.contains("bad token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
