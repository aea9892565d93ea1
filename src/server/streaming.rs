//! The streaming request processor: turns a handler's lazy message sequence
//! into payload frames followed by exactly one trailer frame.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;

use crate::frame::Frame;
use crate::method::{MessageStream, MethodHandler, ServiceDescriptor};
use crate::codec::ParseError;
use crate::encoding::Encoding;
use crate::server::transport::ErrorObserver;
use crate::server::{RpcRequest, ServiceProvider};
use crate::status::{Code, Status};
use crate::trailer;

/// A streaming RPC outcome: the negotiated content type and the frame
/// sequence to deliver, one HTTP chunk per frame.
pub(crate) struct StreamingResponse {
    pub(crate) content_type: &'static str,
    pub(crate) frames: FrameStream,
}

/// Drive the streaming path: decode, invoke, and wrap the handler's lazy
/// sequence into a [`FrameStream`].
pub(crate) async fn process<S: Send + Sync + 'static>(
    descriptor: &ServiceDescriptor<S>,
    provider: &ServiceProvider<S>,
    observer: &ErrorObserver,
    request: RpcRequest,
) -> Result<StreamingResponse, ParseError> {
    let payload = super::single_payload(request.body.clone())?;
    let encoding = request.negotiation.response.encoding;
    let content_type = request.negotiation.response.as_str();

    let outcome = match descriptor.find(request.method.descriptor_key()) {
        Some(MethodHandler::ServerStreaming(invoke)) => {
            invoke(
                provider.instance(),
                payload,
                request.negotiation.request.format,
                request.negotiation.response.format,
                request.call_context(),
            )
            .await?
        }
        // Kind detection routed us here, so a unary entry cannot match; keep
        // the arm so a future drift bug degrades to an in-band error.
        Some(MethodHandler::Unary(_)) => Err(Status::internal(format!(
            "method {} is unary, not server-streaming",
            request.method
        ))),
        None => Err(Status::unimplemented(format!(
            "method {} not found on {}",
            request.method,
            descriptor.name()
        ))),
    };

    let frames = match outcome {
        Ok(stream) => FrameStream::new(stream, encoding, observer.clone()),
        Err(status) => FrameStream::immediate(status, encoding, observer.clone()),
    };

    Ok(StreamingResponse {
        content_type,
        frames,
    })
}

/// One outbound HTTP chunk: an encoded frame, flagged when it is the trailer.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub(crate) bytes: Bytes,
    pub(crate) is_trailer: bool,
}

/// The frame emission state machine.
///
/// Yields one payload frame per source message in producer order, then
/// exactly one trailer frame, on every terminal path: normal completion gets
/// an OK trailer, a mid-stream failure gets an error trailer, and the empty
/// sequence goes straight to the trailer. The source is dropped the moment a
/// terminal state is reached. In text mode each frame is base64-encoded
/// independently, so the chunk boundary stays on the frame boundary.
pub(crate) struct FrameStream {
    state: State,
    encoding: Encoding,
    observer: ErrorObserver,
}

enum State {
    Streaming(MessageStream),
    Trailer(Status),
    Done,
}

impl FrameStream {
    pub(crate) fn new(source: MessageStream, encoding: Encoding, observer: ErrorObserver) -> Self {
        FrameStream {
            state: State::Streaming(source),
            encoding,
            observer,
        }
    }

    /// A response with no payload frames: just the trailer.
    pub(crate) fn immediate(status: Status, encoding: Encoding, observer: ErrorObserver) -> Self {
        FrameStream {
            state: State::Trailer(status),
            encoding,
            observer,
        }
    }
}

impl futures_core::Stream for FrameStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Streaming(source) => match source.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(message))) => {
                        let frame = Frame::payload(message).encode();
                        return Poll::Ready(Some(Chunk {
                            bytes: this.encoding.encode(frame),
                            is_trailer: false,
                        }));
                    }
                    // Replacing the state drops the source; partial results
                    // are never retained past the terminal transition.
                    Poll::Ready(Some(Err(status))) => this.state = State::Trailer(status),
                    Poll::Ready(None) => this.state = State::Trailer(Status::ok("OK")),
                    Poll::Pending => return Poll::Pending,
                },
                State::Trailer(_) => {
                    let status = match std::mem::replace(&mut this.state, State::Done) {
                        State::Trailer(status) => status,
                        _ => unreachable!(),
                    };

                    // Observer runs before the trailer frame is emitted.
                    if status.code() == Code::Unknown {
                        (*this.observer)(&status);
                    }

                    let frame = Frame::trailer(trailer::encode(&status)).encode();
                    return Poll::Ready(Some(Chunk {
                        bytes: this.encoding.encode(frame),
                        is_trailer: true,
                    }));
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Streaming(_) => "Streaming",
            State::Trailer(_) => "Trailer",
            State::Done => "Done",
        };
        f.debug_struct("FrameStream").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn observer() -> (ErrorObserver, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let observer: ErrorObserver = Arc::new(move |_err: &(dyn std::error::Error + 'static)| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (observer, count)
    }

    fn source(items: Vec<Result<Bytes, Status>>) -> MessageStream {
        Box::pin(futures_util::stream::iter(items))
    }

    async fn collect(stream: FrameStream) -> Vec<Chunk> {
        stream.collect().await
    }

    #[tokio::test]
    async fn three_messages_then_ok_trailer() {
        let (observer, observed) = observer();
        let stream = FrameStream::new(
            source(vec![
                Ok(Bytes::from_static(b"m1")),
                Ok(Bytes::from_static(b"m2")),
                Ok(Bytes::from_static(b"m3")),
            ]),
            Encoding::None,
            observer,
        );

        let chunks = collect(stream).await;

        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| !c.is_trailer));
        assert!(chunks[3].is_trailer);
        assert_eq!(&chunks[0].bytes[..], b"\x00\x00\x00\x00\x02m1");
        assert_eq!(
            &chunks[3].bytes[5..],
            b"grpc-status:0\r\ngrpc-message:OK\r\nx-grpc-web:1\r\n"
        );
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_sequence_is_trailer_only() {
        let (observer, _) = observer();
        let stream = FrameStream::new(source(vec![]), Encoding::None, observer);

        let chunks = collect(stream).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_trailer);
    }

    #[tokio::test]
    async fn mid_stream_error_ends_with_error_trailer() {
        let (observer, observed) = observer();
        let stream = FrameStream::new(
            source(vec![
                Ok(Bytes::from_static(b"m1")),
                Err(Status::unknown("boom")),
                Ok(Bytes::from_static(b"never")),
            ]),
            Encoding::None,
            observer,
        );

        let chunks = collect(stream).await;

        // One payload, one trailer; the source is dropped at the error.
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_trailer);
        let text = String::from_utf8_lossy(&chunks[1].bytes[5..]).into_owned();
        assert!(text.starts_with("grpc-status:2\r\ngrpc-message:boom\r\n"));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_failures_do_not_hit_the_observer() {
        let (observer, observed) = observer();
        let stream = FrameStream::new(
            source(vec![Err(Status::invalid_argument("nope"))]),
            Encoding::None,
            observer,
        );

        let chunks = collect(stream).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_trailer);
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn text_mode_encodes_each_frame_independently() {
        use base64::Engine as _;

        let (observer, _) = observer();
        let stream = FrameStream::new(
            source(vec![Ok(Bytes::from_static(b"m1"))]),
            Encoding::Base64,
            observer,
        );

        let chunks = collect(stream).await;

        assert_eq!(chunks.len(), 2);
        let engine = &crate::util::base64::STANDARD;
        let payload = engine.decode(&chunks[0].bytes).unwrap();
        let trailer = engine.decode(&chunks[1].bytes).unwrap();

        assert_eq!(&payload[..], b"\x00\x00\x00\x00\x02m1");
        assert_eq!(trailer[0], 0x80);
    }
}
