//! Behavioural tests for the event stream translator

use serde_json::json;
use std::sync::Arc;

use thinkany_bridge::config::LabelConfig;
use thinkany_bridge::models::Mode;
use thinkany_bridge::translate::{BlockRenderer, Fragment, StreamTranslator, Termination};

fn translator(mode: Mode) -> StreamTranslator {
    StreamTranslator::new(mode, Arc::new(BlockRenderer::default()))
}

fn chunk_line(content: &str) -> String {
    format!(
        "data: {}",
        json!({"object": "chat.completion.chunk", "choices": [{"delta": {"content": content}}]})
    )
}

fn event_line(questions: &[&str], titles: &[&str]) -> String {
    let rag: Vec<_> = titles
        .iter()
        .map(|t| json!({"title": t, "link": format!("https://{t}.example"), "source": t}))
        .collect();
    format!(
        "data: {}",
        json!({"object": "stream.event", "metadata": {"msg": {"questions": questions, "rag_results": rag}}})
    )
}

fn feed_all(t: &mut StreamTranslator, lines: &[String]) -> Vec<Fragment> {
    lines.iter().flat_map(|l| t.feed(l)).collect()
}

#[test]
fn test_answer_header_once_for_fifty_chunks() {
    let mut t = translator(Mode::Search);
    let lines: Vec<String> = (0..50).map(|i| chunk_line(&format!("{i} "))).collect();

    let fragments = feed_all(&mut t, &lines);

    let headers = fragments
        .iter()
        .filter(|f| matches!(f, Fragment::AnswerHeader(_)))
        .count();
    assert_eq!(headers, 1);
    assert_eq!(fragments[0], Fragment::AnswerHeader("### Answer\n".to_string()));
    assert_eq!(fragments.len(), 51);

    let expected: String = (0..50).map(|i| format!("{i} ")).collect();
    assert_eq!(t.answer(), expected);
}

#[test]
fn test_side_channel_blocks_at_most_once() {
    let mut t = translator(Mode::Search);
    let lines = vec![
        event_line(&["first"], &["a"]),
        event_line(&["second", "third"], &["b", "c"]),
        chunk_line("x"),
        event_line(&["late"], &["d"]),
    ];

    let fragments = feed_all(&mut t, &lines);

    let traces: Vec<_> = fragments
        .iter()
        .filter(|f| matches!(f, Fragment::SearchTrace(_)))
        .collect();
    let sources: Vec<_> = fragments
        .iter()
        .filter(|f| matches!(f, Fragment::Sources(_)))
        .collect();
    assert_eq!(traces.len(), 1);
    assert_eq!(sources.len(), 1);
    assert_eq!(
        traces[0],
        &Fragment::SearchTrace("### Search Process\n- first\n\n".to_string())
    );
    assert!(sources[0].text().unwrap().contains("1. a [<sup>1</sup>](https://a.example) - *a*"));
}

#[test]
fn test_empty_lists_do_not_fire_latches() {
    let mut t = translator(Mode::Search);
    let lines = vec![event_line(&[], &[]), event_line(&["real"], &["src"])];

    let fragments = feed_all(&mut t, &lines);

    assert_eq!(fragments.len(), 2);
    assert!(matches!(fragments[0], Fragment::SearchTrace(_)));
    assert!(matches!(fragments[1], Fragment::Sources(_)));
}

#[test]
fn test_garbled_line_between_valid_chunks() {
    let mut t = translator(Mode::Chat);
    let lines = vec![
        chunk_line("before"),
        "data: {\"object\": \"chat.completion.chunk\", \"choices\": [".to_string(),
        chunk_line("after"),
    ];

    let fragments = feed_all(&mut t, &lines);

    assert_eq!(
        fragments,
        vec![
            Fragment::AnswerHeader("### Answer\n".to_string()),
            Fragment::Content("before".to_string()),
            Fragment::Content("after".to_string()),
        ]
    );
    assert!(!t.is_terminated());
    assert_eq!(t.end(), Some(Fragment::Stop));
    assert_eq!(t.finish(), "beforeafter");
}

#[test]
fn test_business_error_is_terminal() {
    let mut t = translator(Mode::Search);
    let lines = vec![
        chunk_line("partial"),
        r#"{"code": -1, "message": "rate limited"}"#.to_string(),
        chunk_line("ignored"),
    ];

    let fragments = feed_all(&mut t, &lines);

    assert_eq!(
        fragments.last(),
        Some(&Fragment::Error("upstream error: rate limited".to_string()))
    );
    assert_eq!(t.termination(), Some(Termination::UpstreamError));
    assert_eq!(t.end(), None);
}

#[test]
fn test_unknown_objects_are_ignored() {
    let mut t = translator(Mode::Search);
    let lines = vec![
        r#"data: {"object": "usage", "total": 10}"#.to_string(),
        r#"data: {"no_object": 1}"#.to_string(),
        r#"{"code": 0, "message": "fine"}"#.to_string(),
    ];

    assert!(feed_all(&mut t, &lines).is_empty());
    assert!(!t.is_terminated());
}

#[test]
fn test_mistyped_fields_do_not_drop_frames() {
    let mut t = translator(Mode::Search);
    let lines = vec![
        r#"data: {"object":"stream.event","metadata":{"msg":"searching"}}"#.to_string(),
        format!(
            "data: {}",
            json!({"object": "stream.event", "metadata": {"msg": {
                "questions": ["numbers"],
                "rag_results": [{"title": 123, "link": "https://n.example", "source": "n.example"}]
            }}})
        ),
        chunk_line("after"),
    ];

    let fragments = feed_all(&mut t, &lines);

    assert_eq!(
        fragments,
        vec![
            Fragment::SearchTrace("### Search Process\n- numbers\n\n".to_string()),
            Fragment::Sources(
                "### Sources\n1. 123 [<sup>1</sup>](https://n.example) - *n.example*\n\n"
                    .to_string()
            ),
            Fragment::AnswerHeader("### Answer\n".to_string()),
            Fragment::Content("after".to_string()),
        ]
    );
    assert!(!t.is_terminated());
}

#[test]
fn test_configured_labels() {
    let labels = LabelConfig {
        search_process: "搜索过程".to_string(),
        sources: "来源".to_string(),
        answer: "回答".to_string(),
        unknown_title: "未知标题".to_string(),
        unknown_source: "未知来源".to_string(),
    };
    let mut t = StreamTranslator::new(Mode::Search, Arc::new(BlockRenderer::new(labels)));

    let fragments = feed_all(
        &mut t,
        &[
            "data: {\"object\":\"stream.event\",\"metadata\":{\"msg\":{\"questions\":[\"q\"],\"rag_results\":[{}]}}}".to_string(),
            chunk_line("x"),
        ],
    );

    assert_eq!(fragments[0].text(), Some("### 搜索过程\n- q\n\n"));
    assert_eq!(
        fragments[1].text(),
        Some("### 来源\n1. 未知标题 [<sup>1</sup>](#) - *未知来源*\n\n")
    );
    assert_eq!(fragments[2].text(), Some("### 回答\n"));
}
