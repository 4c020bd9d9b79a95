//! Application seams: answering requests and approving sessions.
//!
//! The manager decodes each request body into [`RequestHandler::Request`]
//! before calling the handler, and a body that does not decode is answered
//! with `invalid_argument` without reaching it. Whatever the handler returns
//! is delivered to the client: a unary [`Reply::Message`] as a message
//! envelope, a [`Reply::Stream`] over a sub-channel, and an error as a
//! failure envelope.

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use messages::TransportError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::host::SenderInfo;

/// Items of a streamed response.
pub type ReplyStream<T> = BoxStream<'static, Result<T, TransportError>>;

/// What a handler answers with.
pub enum Reply<T> {
    Message(T),
    Stream(ReplyStream<T>),
}

impl<T> Reply<T> {
    /// Box any sendable stream as a streamed reply.
    pub fn stream<S>(items: S) -> Self
    where
        S: Stream<Item = Result<T, TransportError>> + Send + 'static,
    {
        Self::Stream(items.boxed())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Answers requests arriving on any session.
///
/// `cancel` trips when the client aborts the request, the session ends, or
/// the request deadline passes. Handlers that ignore it still run to
/// completion; their answer is then discarded or rewritten by the manager.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn handle(
        &self,
        request: Self::Request,
        cancel: CancellationToken,
    ) -> Result<Reply<Self::Response>, TransportError>;
}

/// Decides whether a connected sender may use its session.
///
/// Messages that arrive before the decision are held and handled in order
/// once the session is approved. A rejection ends the session.
#[async_trait]
pub trait SessionApproval: Send + Sync + 'static {
    async fn approve(&self, sender: &SenderInfo) -> Result<(), TransportError>;
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc;

    use super::*;
    use messages::Code;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum TestRequest {
        Ping,
        Echo { text: String },
        Sleep { ms: u64 },
        /// Sleep, then report whether the request was canceled meanwhile.
        Watch { tag: String, ms: u64 },
        Count { n: u32 },
        Forever,
        Fail { message: String },
        Panic,
    }

    #[derive(Debug, Serialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum TestResponse {
        Pong,
        Echo { text: String },
        Slept,
        Watched { canceled: bool },
        Item { n: u32 },
    }

    pub struct TestHandler {
        pub produced: Arc<AtomicUsize>,
        observed: mpsc::UnboundedSender<(String, bool)>,
    }

    impl TestHandler {
        pub fn with_observer() -> (Self, mpsc::UnboundedReceiver<(String, bool)>) {
            let (observed, rx) = mpsc::unbounded_channel();
            let handler = Self { produced: Arc::new(AtomicUsize::new(0)), observed };
            (handler, rx)
        }
    }

    #[async_trait]
    impl RequestHandler for TestHandler {
        type Request = TestRequest;
        type Response = TestResponse;

        async fn handle(
            &self,
            request: TestRequest,
            cancel: CancellationToken,
        ) -> Result<Reply<TestResponse>, TransportError> {
            match request {
                TestRequest::Ping => Ok(Reply::Message(TestResponse::Pong)),
                TestRequest::Echo { text } => Ok(Reply::Message(TestResponse::Echo { text })),
                TestRequest::Sleep { ms } => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Reply::Message(TestResponse::Slept))
                }
                TestRequest::Watch { tag, ms } => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let canceled = cancel.is_cancelled();
                    let _ = self.observed.send((tag, canceled));
                    Ok(Reply::Message(TestResponse::Watched { canceled }))
                }
                TestRequest::Count { n } => {
                    let produced = Arc::clone(&self.produced);
                    Ok(Reply::stream(futures::stream::iter(0..n).map(move |n| {
                        produced.fetch_add(1, Ordering::SeqCst);
                        Ok(TestResponse::Item { n })
                    })))
                }
                TestRequest::Forever => {
                    let produced = Arc::clone(&self.produced);
                    Ok(Reply::stream(futures::stream::unfold(0, move |n| {
                        let produced = Arc::clone(&produced);
                        async move {
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            produced.fetch_add(1, Ordering::SeqCst);
                            Some((Ok(TestResponse::Item { n }), n + 1))
                        }
                    })))
                }
                TestRequest::Fail { message } => Err(TransportError::new(Code::FailedPrecondition, message)),
                TestRequest::Panic => panic!("handler exploded"),
            }
        }
    }
}
