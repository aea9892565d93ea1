//! The transport adapter: binds the protocol pipeline to an HTTP server
//! surface.
//!
//! A routing layer hands the gateway a fully resolved invocation: the method
//! name from the URL and the raw `http::Request`. The gateway validates the
//! request, runs the unary or streaming processor, and delivers the response
//! either as a buffered body, a lazily streamed [`GatewayBody`], or, when
//! the transport gives up its raw socket, a hand-written chunked response.

use std::convert::Infallible;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body::{Body, SizeHint};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::codec::ParseError;
use crate::content_type::negotiate;
use crate::metadata::Metadata;
use crate::method::{MethodName, RpcKind, ServiceDescriptor};
use crate::server::streaming::{self, FrameStream};
use crate::server::{unary, RpcRequest, ServiceProvider};
use crate::status::Status;
use crate::BoxError;

/// Process-wide callback invoked for unexpected failures before the response
/// (or trailer) that reports them is written. May be called concurrently.
pub type ErrorObserver = Arc<dyn Fn(&(dyn Error + 'static)) + Send + Sync>;

const X_CASCADE: &str = "x-cascade";
const X_ACCEL_BUFFERING: &str = "x-accel-buffering";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// The server-side entry point: one service's descriptor table, its instance
/// strategy, and the error observer, bound to the HTTP surface.
pub struct Gateway<S> {
    descriptor: ServiceDescriptor<S>,
    provider: ServiceProvider<S>,
    observer: ErrorObserver,
}

impl<S: Send + Sync + 'static> Gateway<S> {
    pub fn new(descriptor: ServiceDescriptor<S>, provider: ServiceProvider<S>) -> Gateway<S> {
        Gateway {
            descriptor,
            provider,
            observer: Arc::new(|err: &(dyn Error + 'static)| {
                tracing::error!(error = %err, "grpc-web rpc failure");
            }),
        }
    }

    /// Replace the default (logging) error observer.
    pub fn with_error_observer(
        mut self,
        observer: impl Fn(&(dyn Error + 'static)) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Handle one routed invocation and produce an HTTP response.
    ///
    /// Unary responses arrive fully buffered; streaming responses carry a
    /// lazy body that yields one chunk per frame, so any chunk-capable HTTP
    /// server delivers them incrementally.
    pub async fn call<B>(&self, method: &str, req: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if req.method() != Method::POST {
            debug!(method = %req.method(), "non-POST grpc-web request, passing");
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(X_CASCADE, "pass")
                .body(GatewayBody::empty())
                .unwrap();
        }

        let content_type = header_str(req.headers(), CONTENT_TYPE.as_str());
        let accept = header_str(req.headers(), ACCEPT.as_str());

        let negotiation = match negotiate(content_type.as_deref(), accept.as_deref()) {
            Ok(negotiation) => negotiation,
            Err(err) => {
                debug!(%err, "rejecting request");
                return plain_response(StatusCode::UNSUPPORTED_MEDIA_TYPE);
            }
        };

        let metadata = Metadata::from_headers(req.headers());
        let method = MethodName::resolve(method);
        trace!(method = %method, content_type = negotiation.request.as_str(), "dispatching");

        let body = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => body,
            Err(err) => {
                let status = Status::map_error(err);
                (*self.observer)(&status);
                debug!(error = %status, "failed reading request body");
                return plain_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let body = match negotiation.request.encoding.decode(body) {
            Ok(body) => body,
            Err(err) => return self.reject_undecodable(err),
        };

        let request = RpcRequest {
            negotiation,
            body,
            metadata,
            method: method.clone(),
        };

        match self.descriptor.kind_of(method.descriptor_key()) {
            RpcKind::Unary => {
                match unary::process(&self.descriptor, &self.provider, &self.observer, request)
                    .await
                {
                    Ok(response) => Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, response.content_type)
                        .body(GatewayBody::full(response.body))
                        .unwrap(),
                    Err(err) => self.reject_undecodable(err),
                }
            }
            RpcKind::ServerStreaming => {
                match streaming::process(&self.descriptor, &self.provider, &self.observer, request)
                    .await
                {
                    Ok(response) => Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, response.content_type)
                        .header(CACHE_CONTROL, NO_CACHE)
                        .header(X_ACCEL_BUFFERING, "no")
                        .body(GatewayBody::streaming(response.frames))
                        .unwrap(),
                    Err(err) => self.reject_undecodable(err),
                }
            }
        }
    }

    /// Handle one routed invocation by taking over the raw transport socket.
    ///
    /// Writes the status line, headers, and body directly: streaming
    /// responses become one HTTP chunk per frame followed by the zero-length
    /// terminator, byte-identical to what the chunked fallback produces.
    ///
    /// Errors before the headers are flushed propagate to the caller, which
    /// still owns the connection; once the client has been committed to,
    /// socket failures are swallowed.
    pub async fn call_hijacked<B, W>(
        &self,
        method: &str,
        req: Request<B>,
        socket: W,
    ) -> std::io::Result<()>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
        W: AsyncWrite + Unpin,
    {
        let response = self.call(method, req).await;
        write_response(response, socket).await
    }

    fn reject_undecodable(&self, err: ParseError) -> Response<GatewayBody> {
        (*self.observer)(&err);
        debug!(%err, "rejecting undecodable request");
        plain_response(StatusCode::UNPROCESSABLE_ENTITY)
    }
}

impl<S> std::fmt::Debug for Gateway<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("descriptor", &self.descriptor)
            .field("provider", &self.provider)
            .finish()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn plain_response(status: StatusCode) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .body(GatewayBody::empty())
        .unwrap()
}

/// The response body produced by [`Gateway::call`].
///
/// Infallible by construction: every failure the pipeline can hit after the
/// response head is decided travels in-band as a trailer frame, so the
/// transport never sees a body error mid-stream.
pub struct GatewayBody {
    kind: BodyKind,
}

enum BodyKind {
    Empty,
    Full(Option<Bytes>),
    Streaming(FrameStream),
}

impl GatewayBody {
    pub(crate) fn empty() -> GatewayBody {
        GatewayBody {
            kind: BodyKind::Empty,
        }
    }

    pub(crate) fn full(body: Bytes) -> GatewayBody {
        GatewayBody {
            kind: BodyKind::Full(Some(body)),
        }
    }

    pub(crate) fn streaming(frames: FrameStream) -> GatewayBody {
        GatewayBody {
            kind: BodyKind::Streaming(frames),
        }
    }

    /// Whether this body streams (one chunk per frame) rather than being
    /// fully buffered.
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, BodyKind::Streaming(_))
    }
}

impl Body for GatewayBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.get_mut();

        match &mut this.kind {
            BodyKind::Empty => Poll::Ready(None),
            BodyKind::Full(body) => Poll::Ready(body.take().map(Ok)),
            BodyKind::Streaming(frames) => Pin::new(frames)
                .poll_next(cx)
                .map(|chunk| chunk.map(|c| Ok(c.bytes))),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap<HeaderValue>>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            BodyKind::Empty | BodyKind::Full(None) => true,
            BodyKind::Full(Some(_)) | BodyKind::Streaming(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            BodyKind::Empty | BodyKind::Full(None) => SizeHint::with_exact(0),
            BodyKind::Full(Some(body)) => SizeHint::with_exact(body.len() as u64),
            BodyKind::Streaming(_) => SizeHint::default(),
        }
    }
}

impl std::fmt::Debug for GatewayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "Empty",
            BodyKind::Full(_) => "Full",
            BodyKind::Streaming(_) => "Streaming",
        };
        f.debug_struct("GatewayBody").field("kind", &kind).finish()
    }
}

/// Delivery state over a hijacked socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WriteState {
    Negotiated,
    HeadersSent,
    PayloadSent,
    TrailerSent,
    Closed,
}

async fn write_response<W>(response: Response<GatewayBody>, mut socket: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (parts, body) = response.into_parts();
    let mut state = WriteState::Negotiated;

    let mut head = BytesMut::new();
    head.put_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in &parts.headers {
        head.put_slice(name.as_str().as_bytes());
        head.put_slice(b": ");
        head.put_slice(value.as_bytes());
        head.put_slice(b"\r\n");
    }

    match &body.kind {
        BodyKind::Streaming(_) => {
            head.put_slice(b"transfer-encoding: chunked\r\n");
            head.put_slice(b"connection: keep-alive\r\n");
        }
        BodyKind::Full(Some(bytes)) => {
            head.put_slice(format!("content-length: {}\r\n", bytes.len()).as_bytes());
        }
        BodyKind::Empty | BodyKind::Full(None) => {
            head.put_slice(b"content-length: 0\r\n");
        }
    }
    head.put_slice(b"\r\n");
    trace!(?state, len = head.len(), "response head assembled");

    // The connection is still the caller's until the head is flushed.
    socket.write_all(&head).await?;
    socket.flush().await?;
    state = WriteState::HeadersSent;
    trace!(?state, "response head written");

    match body.kind {
        BodyKind::Empty | BodyKind::Full(None) => {}
        BodyKind::Full(Some(bytes)) => {
            if let Err(err) = socket.write_all(&bytes).await {
                warn!(%err, "socket closed while writing buffered body");
            }
        }
        BodyKind::Streaming(mut frames) => {
            while let Some(chunk) = frames.next().await {
                let mut out = BytesMut::with_capacity(chunk.bytes.len() + 16);
                out.put_slice(format!("{:x}\r\n", chunk.bytes.len()).as_bytes());
                out.put_slice(&chunk.bytes);
                out.put_slice(b"\r\n");

                let write = async {
                    socket.write_all(&out).await?;
                    socket.flush().await
                };
                if let Err(err) = write.await {
                    // Dropping the frame stream stops the lazy source.
                    warn!(%err, "socket closed mid-stream");
                    return Ok(());
                }

                state = if chunk.is_trailer {
                    WriteState::TrailerSent
                } else {
                    WriteState::PayloadSent
                };
                trace!(?state, len = chunk.bytes.len(), "chunk written");
            }

            if let Err(err) = socket.write_all(b"0\r\n\r\n").await {
                warn!(%err, "socket closed before terminating chunk");
            }
        }
    }

    if let Err(err) = socket.flush().await {
        warn!(%err, "socket closed at flush");
    }
    state = WriteState::Closed;
    trace!(?state, "response complete");

    Ok(())
}
