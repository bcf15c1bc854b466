//! Per-request pipeline: backend call, translation, history commit
//!
//! The pipeline is a single generator so fragment order is strict and
//! dropping the response body (client disconnect) drops the upstream
//! response with it. History is committed only after the upstream stream
//! ended without error, right before the stop fragment is yielded.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

use crate::models::Mode;
use crate::session::{ConversationStore, SessionId};
use crate::translate::{BlockRenderer, Fragment, StreamTranslator};
use crate::upstream::{BuiltRequest, Credential, UpstreamClient};

use super::chunk::ChunkEmitter;

/// Everything one backend exchange needs
#[derive(Debug)]
pub struct Exchange {
    pub session_id: SessionId,
    pub mode: Mode,
    pub built: BuiltRequest,
    pub credential: Credential,
}

#[derive(Debug, Clone)]
pub struct Relay {
    client: UpstreamClient,
    store: Arc<ConversationStore>,
    renderer: Arc<BlockRenderer>,
}

impl Relay {
    pub fn new(
        client: UpstreamClient,
        store: Arc<ConversationStore>,
        renderer: Arc<BlockRenderer>,
    ) -> Self {
        Self {
            client,
            store,
            renderer,
        }
    }

    /// Ordered fragments for one exchange; always ends with a terminal one
    pub fn fragments(&self, exchange: Exchange) -> impl Stream<Item = Fragment> + Send + 'static {
        let client = self.client.clone();
        let store = Arc::clone(&self.store);
        let renderer = Arc::clone(&self.renderer);

        async_stream::stream! {
            let Exchange { session_id, mode, built, credential } = exchange;
            let mut translator = StreamTranslator::new(mode, renderer);

            if let Ok(payload) = serde_json::to_string(&built.payload) {
                tracing::debug!(session = %session_id, "Upstream payload: {payload}");
            }

            let mut lines = match client.open(&built.payload, &credential).await {
                Ok(lines) => lines,
                Err(err) => {
                    tracing::error!(session = %session_id, category = err.category(), "Upstream request failed: {err}");
                    yield translator.fail(&err);
                    return;
                }
            };

            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        tracing::debug!("Upstream line: {line}");
                        for fragment in translator.feed(&line) {
                            yield fragment;
                        }
                        if translator.is_terminated() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(session = %session_id, category = err.category(), "Upstream stream failed: {err}");
                        yield translator.fail(&err);
                        return;
                    }
                }
            }

            if let Some(stop) = translator.end() {
                let answer = translator.finish();
                tracing::info!(
                    session = %session_id,
                    conversation = %built.conversation_id(),
                    "Exchange complete, {} answer chars",
                    answer.chars().count()
                );
                store.put(session_id, built.committed_session(answer)).await;
                yield stop;
            }
        }
    }
}

/// Frame fragments as an SSE body, ending with the `[DONE]` sentinel
pub fn sse_body<S>(
    fragments: S,
    emitter: ChunkEmitter,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Fragment> + Send + 'static,
{
    async_stream::stream! {
        let mut fragments = Box::pin(fragments);
        while let Some(fragment) = fragments.next().await {
            yield Ok(emitter.frame(&fragment));
        }
        yield Ok(emitter.done_frame());
    }
}

/// Concatenated text of every fragment, for non-streaming responses
pub async fn aggregate<S>(fragments: S) -> String
where
    S: Stream<Item = Fragment>,
{
    fragments
        .fold(String::new(), |mut text, fragment| async move {
            if let Some(t) = fragment.text() {
                text.push_str(t);
            }
            text
        })
        .await
}
