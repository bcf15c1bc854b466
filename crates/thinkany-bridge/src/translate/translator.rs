//! Upstream event stream to client fragments
//!
//! One translator lives for one response. It consumes raw upstream lines in
//! order and produces the ordered text fragments the client receives. The
//! three side-channel blocks are guarded by latches so each appears at most
//! once, however often the backend repeats them.

use std::sync::Arc;

use crate::models::Mode;
use crate::proxy::ProxyError;

use super::event::{UpstreamEvent, business_error};
use super::render::BlockRenderer;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// A flag that can only go from open to fired
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Latch(bool);

impl Latch {
    /// Fire the latch; true only on the first call
    pub fn fire(&mut self) -> bool {
        !std::mem::replace(&mut self.0, true)
    }

    pub fn is_fired(&self) -> bool {
        self.0
    }
}

/// One piece of client-visible output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    SearchTrace(String),
    Sources(String),
    AnswerHeader(String),
    Content(String),
    /// Terminal error text; nothing but the sentinel follows it
    Error(String),
    /// Normal end of the answer
    Stop,
}

impl Fragment {
    /// Text carried by the fragment, `None` for [`Fragment::Stop`]
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::SearchTrace(t)
            | Fragment::Sources(t)
            | Fragment::AnswerHeader(t)
            | Fragment::Content(t)
            | Fragment::Error(t) => Some(t.as_str()),
            Fragment::Stop => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Fragment::Error(_) | Fragment::Stop)
    }
}

/// Why a translator stopped accepting input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    UpstreamError,
    TransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Awaiting,
    Terminated(Termination),
}

#[derive(Debug)]
pub struct StreamTranslator {
    mode: Mode,
    renderer: Arc<BlockRenderer>,
    search_trace: Latch,
    sources: Latch,
    answer_header: Latch,
    answer: String,
    state: State,
}

impl StreamTranslator {
    pub fn new(mode: Mode, renderer: Arc<BlockRenderer>) -> Self {
        Self {
            mode,
            renderer,
            search_trace: Latch::default(),
            sources: Latch::default(),
            answer_header: Latch::default(),
            answer: String::new(),
            state: State::Awaiting,
        }
    }

    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            State::Awaiting => None,
            State::Terminated(cause) => Some(cause),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.termination().is_some()
    }

    /// Consume one upstream line
    pub fn feed(&mut self, line: &str) -> Vec<Fragment> {
        if self.is_terminated() {
            return Vec::new();
        }

        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            if let Some(message) = business_error(line) {
                tracing::error!("Upstream business error: {message}");
                return vec![self.fail(&ProxyError::UpstreamBusiness(message))];
            }
            return Vec::new();
        };

        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_MARKER {
            return Vec::new();
        }

        let event = match UpstreamEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                let err = ProxyError::MalformedFrame(e.to_string());
                tracing::warn!(category = err.category(), "Skipping upstream frame: {err}");
                return Vec::new();
            }
        };

        self.translate(&event)
    }

    fn translate(&mut self, event: &UpstreamEvent) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        match event {
            UpstreamEvent::StreamEvent { .. } if self.mode == Mode::Search => {
                if let Some(questions) = event.questions() {
                    if self.search_trace.fire() {
                        fragments
                            .push(Fragment::SearchTrace(self.renderer.search_trace(questions)));
                    }
                }
                if let Some(results) = event.rag_results() {
                    if self.sources.fire() {
                        fragments.push(Fragment::Sources(self.renderer.sources(results)));
                    }
                }
            }
            UpstreamEvent::CompletionChunk { .. } => {
                if self.answer_header.fire() {
                    fragments.push(Fragment::AnswerHeader(self.renderer.answer_header()));
                }
                if let Some(content) = event.delta_content() {
                    self.answer.push_str(content);
                    fragments.push(Fragment::Content(content.to_string()));
                }
            }
            _ => {}
        }

        fragments
    }

    /// Terminate with an error; the returned fragment is the last one
    pub fn fail(&mut self, err: &ProxyError) -> Fragment {
        let cause = match err {
            ProxyError::UpstreamBusiness(_) => Termination::UpstreamError,
            _ => Termination::TransportError,
        };
        self.state = State::Terminated(cause);
        Fragment::Error(err.stream_message())
    }

    /// The upstream stream ended normally
    pub fn end(&mut self) -> Option<Fragment> {
        if self.is_terminated() {
            return None;
        }
        self.state = State::Terminated(Termination::Completed);
        Some(Fragment::Stop)
    }

    /// Answer text accumulated so far, headings excluded
    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn finish(self) -> String {
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator(mode: Mode) -> StreamTranslator {
        StreamTranslator::new(mode, Arc::new(BlockRenderer::default()))
    }

    fn chunk(content: &str) -> String {
        serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": content}}]
        })
        .to_string()
    }

    #[test]
    fn test_latch_fires_once() {
        let mut latch = Latch::default();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
    }

    #[test]
    fn test_header_then_content() {
        let mut t = translator(Mode::Chat);
        let out = t.feed(&format!("data: {}", chunk("Hel")));
        assert_eq!(
            out,
            vec![
                Fragment::AnswerHeader("### Answer\n".to_string()),
                Fragment::Content("Hel".to_string()),
            ]
        );
        let out = t.feed(&format!("data:{}", chunk("lo")));
        assert_eq!(out, vec![Fragment::Content("lo".to_string())]);
        assert_eq!(t.answer(), "Hello");
    }

    #[test]
    fn test_stream_events_ignored_in_chat_mode() {
        let mut t = translator(Mode::Chat);
        let out = t.feed(
            r#"data: {"object":"stream.event","metadata":{"msg":{"questions":["q"]}}}"#,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_search_blocks_latch() {
        let mut t = translator(Mode::Search);
        let out = t.feed(
            r#"data: {"object":"stream.event","metadata":{"msg":{"questions":["a","b"]}}}"#,
        );
        assert_eq!(
            out,
            vec![Fragment::SearchTrace("### Search Process\n- a\n- b\n\n".to_string())]
        );

        let out = t.feed(
            r#"data: {"object":"stream.event","metadata":{"msg":{"questions":["c"],"rag_results":[{"title":"T","link":"L","source":"S"}]}}}"#,
        );
        assert_eq!(
            out,
            vec![Fragment::Sources("### Sources\n1. T [<sup>1</sup>](L) - *S*\n\n".to_string())]
        );
    }

    #[test]
    fn test_non_data_lines() {
        let mut t = translator(Mode::Search);
        assert!(t.feed("").is_empty());
        assert!(t.feed("   ").is_empty());
        assert!(t.feed("event: message").is_empty());
        assert!(t.feed(": keep-alive").is_empty());
        assert!(t.feed("data: ").is_empty());
        assert!(t.feed("data: [DONE]").is_empty());
        assert!(!t.is_terminated());
    }

    #[test]
    fn test_business_error_terminates() {
        let mut t = translator(Mode::Search);
        let out = t.feed(r#"{"code":-1,"message":"cookie expired"}"#);
        assert_eq!(
            out,
            vec![Fragment::Error("upstream error: cookie expired".to_string())]
        );
        assert_eq!(t.termination(), Some(Termination::UpstreamError));

        assert!(t.feed(&format!("data: {}", chunk("late"))).is_empty());
        assert_eq!(t.end(), None);
        assert_eq!(t.answer(), "");
    }

    #[test]
    fn test_transport_failure() {
        let mut t = translator(Mode::Chat);
        t.feed(&format!("data: {}", chunk("partial")));
        let fragment = t.fail(&ProxyError::Network("reset".to_string()));
        assert!(fragment.is_terminal());
        assert_eq!(t.termination(), Some(Termination::TransportError));
    }

    #[test]
    fn test_end_emits_stop_once() {
        let mut t = translator(Mode::Chat);
        assert_eq!(t.end(), Some(Fragment::Stop));
        assert_eq!(t.end(), None);
        assert_eq!(t.termination(), Some(Termination::Completed));
    }

    #[test]
    fn test_fragment_text() {
        assert_eq!(Fragment::Content("x".to_string()).text(), Some("x"));
        assert_eq!(Fragment::Stop.text(), None);
        assert!(!Fragment::Sources(String::new()).is_terminal());
    }
}
