use context_pilot::{ConversationAnalyzer, Message, MessageKind, Part, SegmentType};

fn tool_call(text: &str, name: &str) -> Message {
    Message::assistant(text).with_part(Part::ToolCall {
        name: name.to_string(),
        arguments: serde_json::json!({}),
    })
}

// ========== Tool Chain Extraction ==========

#[test]
fn test_complete_chain() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("run the tests"),
        tool_call("running", "shell"),
        Message::tool_result("shell", "all green", false),
        Message::assistant("everything passed"),
    ];
    let chains = analyzer.identify_tool_chains(&messages);
    assert_eq!(chains.len(), 1);
    let chain = &chains[0];
    assert!(chain.is_complete);
    assert_eq!(chain.end_index, Some(3));
    assert_eq!(chain.final_response, Some(3));
    assert_eq!(chain.user_message, 0);
    assert_eq!(chain.assistant_with_tools, 1);
    assert_eq!(chain.tool_results, vec![2]);
}

#[test]
fn test_incomplete_chain_without_final_reply() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("run the tests"),
        tool_call("running", "shell"),
        Message::tool_result("shell", "all green", false),
    ];
    let chains = analyzer.identify_tool_chains(&messages);
    assert_eq!(chains.len(), 1);
    assert!(!chains[0].is_complete);
    assert_eq!(chains[0].end_index, None);
    assert_eq!(chains[0].last_index(), 2);
}

#[test]
fn test_chain_requires_assistant_tool_call() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("just chatting"),
        Message::assistant("plain reply"),
        Message::user("more chatting"),
        Message::assistant("another plain reply"),
    ];
    assert!(analyzer.identify_tool_chains(&messages).is_empty());
}

#[test]
fn test_multiple_chains_with_multiple_results() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("check both files"),
        tool_call("reading", "read_file"),
        Message::tool_result("read_file", "contents a", false),
        Message::tool_result("read_file", "contents b", false),
        Message::assistant("both files look fine"),
        Message::user("now run the build"),
        tool_call("building", "shell"),
        Message::tool_result("shell", "build error: missing symbol", false),
    ];
    let chains = analyzer.identify_tool_chains(&messages);
    assert_eq!(chains.len(), 2);
    assert!(chains[0].is_complete);
    assert_eq!(chains[0].tool_results, vec![2, 3]);
    assert!(!chains[1].is_complete);
    assert!(chains[1].has_errors);
}

#[test]
fn test_chain_diverges_on_next_user_turn() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("start"),
        tool_call("working", "shell"),
        Message::tool_result("shell", "output", false),
        Message::user("never mind"),
        Message::assistant("ok, stopping"),
    ];
    let chains = analyzer.identify_tool_chains(&messages);
    assert_eq!(chains.len(), 1);
    assert!(!chains[0].is_complete);
    assert_eq!(chains[0].last_index(), 2);
}

// ========== Segmentation ==========

#[test]
fn test_segments_cover_all_indices_without_overlap() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::system("rules"),
        Message::user("q1"),
        Message::assistant("a1"),
        Message::user("q2"),
        tool_call("checking", "shell"),
        Message::tool_result("shell", "done", false),
        Message::assistant("finished"),
    ];
    let segments = analyzer.segment_conversation(&messages);

    let mut covered = Vec::new();
    for segment in &segments {
        assert_eq!(
            segment.message_indices,
            (segment.start_index..=segment.end_index).collect::<Vec<_>>()
        );
        covered.extend(segment.message_indices.clone());
    }
    covered.sort_unstable();
    covered.dedup();
    assert_eq!(covered, (0..messages.len()).collect::<Vec<_>>());
}

#[test]
fn test_tool_activity_flag_per_segment() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::user("plain question"),
        Message::assistant("plain answer"),
        Message::user("tooled question"),
        tool_call("on it", "shell"),
        Message::tool_result("shell", "result", false),
    ];
    let segments = analyzer.segment_conversation(&messages);
    assert_eq!(segments.len(), 2);
    assert!(!segments[0].has_tool_activity);
    assert!(segments[1].has_tool_activity);
    assert_eq!(segments[1].user_query.as_deref(), Some("tooled question"));
}

#[test]
fn test_leading_messages_become_standalone_segments() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::system("rules"),
        Message::user(format!(
            "{} {{\"branch\": \"main\"}}",
            context_pilot::CONTEXT_INJECTION_MARKER
        )),
        Message::user("actual question"),
        Message::assistant("answer"),
    ];
    let segments = analyzer.segment_conversation(&messages);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].segment_type, SegmentType::System);
    assert_eq!(segments[1].segment_type, SegmentType::ContextInjection);
    assert_eq!(segments[2].segment_type, SegmentType::Conversation);
}

// ========== Structure Analysis ==========

#[test]
fn test_analysis_bundles_counts_and_current_turn() {
    let analyzer = ConversationAnalyzer::new();
    let messages = vec![
        Message::system("rules"),
        Message::user("first"),
        Message::assistant("reply"),
        Message::user("second"),
        tool_call("working", "shell"),
        Message::tool_result("shell", "output", false),
    ];
    let analysis = analyzer.analyze_conversation_structure(&messages);

    assert_eq!(analysis.total_messages, 6);
    assert_eq!(analysis.kind_counts[&MessageKind::User], 2);
    assert_eq!(analysis.kind_counts[&MessageKind::System], 1);
    assert_eq!(analysis.current_user_message, Some(3));
    assert_eq!(analysis.current_tool_chains.len(), 1);
    assert_eq!(analysis.completed_conversations.len(), 2);
    assert_eq!(analysis.system_messages, vec![0]);
}
