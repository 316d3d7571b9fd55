use context_pilot::{
    ConversationFilter, FilterPolicy, FilterStrategy, Message, Part, TokenCounter,
};

fn tool_call(text: &str, name: &str) -> Message {
    Message::assistant(text).with_part(Part::ToolCall {
        name: name.to_string(),
        arguments: serde_json::json!({}),
    })
}

fn policy(strategy: FilterStrategy) -> FilterPolicy {
    FilterPolicy {
        strategy,
        ..FilterPolicy::default()
    }
}

/// 1 system message + 3 user/assistant exchanges, the last one tool-using.
fn eight_message_conversation() -> Vec<Message> {
    vec![
        Message::system("You are a meticulous assistant for this repository and its tooling."),
        Message::user("Describe the overall layout of the project in a few sentences."),
        Message::assistant("The project is one crate split into parsing, scoring and output."),
        Message::user("Which module would you start reading to understand scoring?"),
        Message::assistant("Start with the scoring module, it drives everything downstream."),
        Message::user("Please run the test suite and summarize the outcome for me."),
        tool_call("Running the suite now.", "shell"),
        Message::tool_result("shell", "test result: ok. 42 passed", false),
    ]
}

// ========== Idempotence ==========

#[test]
fn test_under_budget_returns_conversation_unchanged() {
    let filter =
        ConversationFilter::with_counter(policy(FilterStrategy::Moderate), TokenCounter::heuristic());
    let messages = eight_message_conversation();
    let result = filter.filter_conversation(&messages, 1_000_000);

    assert!(!result.filtering_applied);
    assert_eq!(result.filtered_messages.len(), messages.len());
    assert_eq!(result.kept_indices, (0..messages.len()).collect::<Vec<_>>());
    assert!(result.removed_indices.is_empty());
    assert_eq!(result.tokens_saved, Some(0));
}

// ========== Aggressive Scenario ==========

#[test]
fn test_aggressive_keeps_system_and_recent_pair() {
    let mut policy = policy(FilterStrategy::Aggressive);
    policy.min_conversations_to_keep = 1;
    let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());

    let messages = eight_message_conversation();
    let result = filter.filter_conversation(&messages, 50);

    assert!(result.filtering_applied);
    assert!(result.filtered_messages.len() < 8);
    // System message survives.
    assert!(result.kept_indices.contains(&0));
    // The most recent user turn and its tool exchange survive.
    assert!(result.kept_indices.contains(&5));
    assert!(result.kept_indices.contains(&6));
    assert!(result.kept_indices.contains(&7));
}

#[test]
fn test_aggressive_fits_budget_when_middle_is_removable() {
    let mut policy = policy(FilterStrategy::Aggressive);
    policy.min_conversations_to_keep = 2;
    policy.preserve_tool_chains = false;
    let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());

    // Two sizable plain segments; nothing tool-related to protect.
    let mut messages = vec![Message::system("short rules")];
    for i in 0..6 {
        messages.push(Message::user(format!(
            "question {i} padded with words so each message costs a fair amount"
        )));
        messages.push(Message::assistant(
            "a correspondingly padded answer so each message costs a fair amount",
        ));
    }
    let budget = 120;
    let result = filter.filter_conversation(&messages, budget);
    assert!(result.filtered_tokens.unwrap() <= budget);
}

// ========== Duplicate-Content Identity ==========

#[test]
fn test_duplicate_user_turns_keep_their_own_tool_exchanges() {
    let mut policy = policy(FilterStrategy::Aggressive);
    policy.min_conversations_to_keep = 1;
    policy.preserve_tool_chains = false;
    let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());

    // Three identical "ok" turns, each with a distinct tool exchange.
    let messages = vec![
        Message::user("ok"),
        tool_call("calling alpha", "alpha"),
        Message::tool_result("alpha", "alpha output", false),
        Message::assistant("alpha finished"),
        Message::user("ok"),
        tool_call("calling beta", "beta"),
        Message::tool_result("beta", "beta output", false),
        Message::assistant("beta finished"),
        Message::user("ok"),
        tool_call("calling gamma", "gamma"),
        Message::tool_result("gamma", "gamma output", false),
        Message::assistant("gamma finished"),
    ];
    let result = filter.filter_conversation(&messages, 20);

    // The kept "ok" must be the third instance, not the first match by
    // content.
    assert_eq!(result.kept_indices, vec![8, 9, 10, 11]);

    // Every kept tool call is immediately followed by its own response.
    for (position, message) in result.filtered_messages.iter().enumerate() {
        if let Some(Part::ToolCall { name, .. }) = message
            .parts
            .iter()
            .find(|p| matches!(p, Part::ToolCall { .. }))
        {
            let next = &result.filtered_messages[position + 1];
            let Some(Part::ToolResponse { name: response_name, .. }) = next
                .parts
                .iter()
                .find(|p| matches!(p, Part::ToolResponse { .. }))
            else {
                panic!("tool call not followed by a tool response");
            };
            assert_eq!(response_name, name, "tool response mismatched to call");
        }
    }
}

// ========== Moderate Strategy ==========

#[test]
fn test_moderate_respects_minimum_floor() {
    let mut policy = policy(FilterStrategy::Moderate);
    policy.min_conversations_to_keep = 2;
    policy.max_conversations_to_keep = 4;
    policy.preserve_tool_chains = false;
    policy.preserve_current_turn = false;
    let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());

    let mut messages = Vec::new();
    for i in 0..5 {
        messages.push(Message::user(format!(
            "question number {i} with enough words to make every segment cost tokens"
        )));
        messages.push(Message::assistant(
            "an answer with enough words to make every segment cost real tokens",
        ));
    }
    // Budget far below even two segments: the floor must still hold.
    let result = filter.filter_conversation(&messages, 5);
    assert!(result.filtered_messages.len() >= 4, "floor of 2 segments violated");
}

#[test]
fn test_moderate_sheds_segments_to_fit() {
    let mut policy = policy(FilterStrategy::Moderate);
    policy.min_conversations_to_keep = 1;
    policy.max_conversations_to_keep = 10;
    policy.preserve_tool_chains = false;
    policy.preserve_current_turn = false;
    let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());

    let mut messages = Vec::new();
    for i in 0..8 {
        messages.push(Message::user(format!(
            "question number {i} padded out with quite a few additional words"
        )));
        messages.push(Message::assistant(
            "an answer padded out with quite a few additional words as well",
        ));
    }
    let budget = 100;
    let result = filter.filter_conversation(&messages, budget);
    assert!(result.filtering_applied);
    assert!(result.filtered_tokens.unwrap() <= budget);
    assert!(result.tokens_saved.unwrap() > 0);
    assert!(result.met_reduction_target(0.3));
    assert!(result.summary().contains("moderate"));
}

// ========== Preservation Accounting ==========

#[test]
fn test_preserved_chain_and_injection_counts() {
    let filter = ConversationFilter::with_counter(
        policy(FilterStrategy::Conservative),
        TokenCounter::heuristic(),
    );
    let messages = vec![
        Message::user(format!(
            "{} {{\"cwd\": \"/repo\"}}",
            context_pilot::CONTEXT_INJECTION_MARKER
        )),
        Message::user("Inspect the failing module for me, and be thorough about it."),
        tool_call("inspecting", "read_file"),
        Message::tool_result("read_file", "module contents", false),
        Message::assistant("The module looks structurally sound."),
    ];
    let result = filter.filter_conversation(&messages, 1);
    assert_eq!(result.preserved_context_injections, 1);
    assert_eq!(result.preserved_tool_chains, 1);
}
