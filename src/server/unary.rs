//! The unary request processor: decode, invoke, and buffer a fixed two-frame
//! response body.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::codec::ParseError;
use crate::frame::Frame;
use crate::method::{MethodHandler, ServiceDescriptor};
use crate::server::transport::ErrorObserver;
use crate::server::{RpcRequest, ServiceProvider};
use crate::status::{Code, Status};
use crate::trailer;

/// A unary RPC outcome: the negotiated content type and the fully encoded
/// body (text-transformed when negotiated).
pub(crate) struct UnaryResponse {
    pub(crate) content_type: &'static str,
    pub(crate) body: Bytes,
}

/// Drive the unary path.
///
/// A successful handler produces a payload frame followed by an OK trailer; a
/// failing one produces the error trailer alone. Either way the body carries
/// exactly one trailer frame and it is the last frame.
pub(crate) async fn process<S: Send + Sync + 'static>(
    descriptor: &ServiceDescriptor<S>,
    provider: &ServiceProvider<S>,
    observer: &ErrorObserver,
    request: RpcRequest,
) -> Result<UnaryResponse, ParseError> {
    let payload = super::single_payload(request.body.clone())?;

    let reply = match descriptor.find(request.method.descriptor_key()) {
        Some(MethodHandler::Unary(invoke)) => {
            invoke(
                provider.instance(),
                payload,
                request.negotiation.request.format,
                request.negotiation.response.format,
                request.call_context(),
            )
            .await?
        }
        // Kind detection falls back to unary for unknown methods, so the
        // missing-descriptor case lands here and is reported in-band.
        None => {
            debug!(method = %request.method, service = descriptor.name(), "method not found");
            Err(Status::unimplemented(format!(
                "method {} not found on {}",
                request.method,
                descriptor.name()
            )))
        }
        Some(MethodHandler::ServerStreaming(_)) => Err(Status::internal(format!(
            "method {} is server-streaming, not unary",
            request.method
        ))),
    };

    let mut body = BytesMut::new();
    match reply {
        Ok(message) => {
            body.put_slice(&Frame::payload(message).encode());
            body.put_slice(&Frame::trailer(trailer::encode(&Status::ok("OK"))).encode());
        }
        Err(status) => {
            // Observer runs before the trailer is built.
            if status.code() == Code::Unknown {
                (**observer)(&status);
            }
            body.put_slice(&Frame::trailer(trailer::encode(&status)).encode());
        }
    }

    Ok(UnaryResponse {
        content_type: request.negotiation.response.as_str(),
        body: request.negotiation.response.encoding.encode(body.freeze()),
    })
}
