//! Transformations over the ordered conversation.
//!
//! Each transform takes the full message list and returns a new one; a
//! [`HistoryPipeline`] applies them in order, so later transforms see the
//! output of earlier ones. Two pipelines are built from [`HistoryConfig`]:
//! the persistent one rewrites the conversation the agent owns, the request
//! one only shapes the copy sent to the model.

use crate::types::{Message, Role};
use std::collections::{BTreeSet, HashSet};

pub const RECENT_CONTEXT_MARKER: &str = "[Recent context]";

pub trait HistoryTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, messages: Vec<Message>) -> Vec<Message>;
}

#[derive(Default)]
pub struct HistoryPipeline {
    transforms: Vec<Box<dyn HistoryTransform>>,
}

impl HistoryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: impl HistoryTransform + 'static) -> Self {
        self.push(transform);
        self
    }

    pub fn push(&mut self, transform: impl HistoryTransform + 'static) {
        self.transforms.push(Box::new(transform));
    }

    pub fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        self.transforms
            .iter()
            .fold(messages, |messages, transform| transform.apply(messages))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl std::fmt::Debug for HistoryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Compress once the conversation grows past this many messages.
    pub compress_threshold: usize,
    /// Messages kept (besides system messages) when compressing.
    pub keep_recent: usize,
    /// Tool results longer than this are cut down. 0 disables.
    pub max_tool_result_chars: usize,
    /// Estimated token budget of the request view.
    pub token_budget: Option<usize>,
    /// Restrict the request view to results of these tools.
    pub keep_tools: Option<BTreeSet<String>>,
    /// Size of the highlighted recent window. 0 disables.
    pub highlight_recent: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            compress_threshold: 40,
            keep_recent: 20,
            max_tool_result_chars: 12_000,
            token_budget: None,
            keep_tools: None,
            highlight_recent: 6,
        }
    }
}

impl HistoryConfig {
    /// Applied to the owned conversation after every tool round.
    pub fn persistent_pipeline(&self) -> HistoryPipeline {
        let mut pipeline = HistoryPipeline::new();
        if self.max_tool_result_chars > 0 {
            pipeline.push(ToolResultSummarizer::new(self.max_tool_result_chars));
        }
        pipeline
            .then(ConsecutiveDedup)
            .then(Compression::new(self.compress_threshold, self.keep_recent))
            .then(RepairToolPairs)
    }

    /// Applied to a copy of the conversation right before inference.
    pub fn request_pipeline(&self, progress: Option<String>) -> HistoryPipeline {
        let mut pipeline = HistoryPipeline::new();
        if let Some(keep) = &self.keep_tools {
            pipeline.push(ToolResultFilter::new(keep.iter().cloned()));
        }
        if let Some(max_tokens) = self.token_budget {
            pipeline.push(TokenBudget::new(max_tokens));
        }
        if self.highlight_recent > 0 {
            pipeline.push(RecentContextMarker::new(self.highlight_recent));
        }
        pipeline.push(RepairToolPairs);
        if let Some(progress) = progress {
            pipeline.push(ContextInjection::new(progress));
        }
        pipeline
    }
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2FA1F
    )
}

/// Cheap token estimate: CJK ideographs cost ~1.5 chars per token, anything
/// else ~4 chars per token. Non-empty text costs at least one token.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk_ideograph(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });

    let estimate = (cjk as f64 / 1.5 + other as f64 / 4.0).ceil() as usize;
    estimate.max(1)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    estimate_tokens(&message.content)
        + message
            .tool_calls
            .iter()
            .map(|call| estimate_tokens(&call.name) + estimate_tokens(&call.arguments))
            .sum::<usize>()
}

/// Keeps the newest messages that fit in `max_tokens`, plus the first system
/// and first user message.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    pub max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl HistoryTransform for TokenBudget {
    fn name(&self) -> &'static str {
        "token_budget"
    }

    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        let first_system = messages.iter().position(|m| m.role == Role::System);
        let first_user = messages.iter().position(|m| m.role == Role::User);
        let pinned: HashSet<usize> = first_system.into_iter().chain(first_user).collect();

        let pinned_cost: usize = pinned
            .iter()
            .map(|&idx| estimate_message_tokens(&messages[idx]))
            .sum();
        let mut remaining = self.max_tokens.saturating_sub(pinned_cost);

        let mut keep = pinned.clone();
        for (idx, message) in messages.iter().enumerate().rev() {
            if pinned.contains(&idx) {
                continue;
            }
            let cost = estimate_message_tokens(message);
            if cost > remaining {
                break;
            }
            remaining -= cost;
            keep.insert(idx);
        }

        messages
            .into_iter()
            .enumerate()
            .filter_map(|(idx, message)| keep.contains(&idx).then_some(message))
            .collect()
    }
}

/// Keeps only tool calls (and their results) for the named tools.
#[derive(Debug, Clone)]
pub struct ToolResultFilter {
    pub keep: BTreeSet<String>,
}

impl ToolResultFilter {
    pub fn new(keep: impl IntoIterator<Item = String>) -> Self {
        Self {
            keep: keep.into_iter().collect(),
        }
    }
}

impl HistoryTransform for ToolResultFilter {
    fn name(&self) -> &'static str {
        "tool_result_filter"
    }

    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        let kept_ids: HashSet<String> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .filter(|call| self.keep.contains(&call.name))
            .map(|call| call.id.clone())
            .collect();

        messages
            .into_iter()
            .filter_map(|mut message| match message.role {
                Role::System | Role::User => Some(message),
                Role::Assistant => {
                    if !message.has_tool_calls() {
                        return Some(message);
                    }
                    message
                        .tool_calls
                        .retain(|call| self.keep.contains(&call.name));
                    (message.has_tool_calls() || !message.content.is_empty()).then_some(message)
                }
                Role::Tool => message
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| kept_ids.contains(id))
                    .then_some(message),
            })
            .collect()
    }
}

/// Cuts tool results longer than `max_chars` and notes how much was elided.
#[derive(Debug, Clone)]
pub struct ToolResultSummarizer {
    pub max_chars: usize,
}

impl ToolResultSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

pub fn truncate_with_marker(text: &str, max_chars: usize) -> Option<String> {
    let total = text.chars().count();
    if total <= max_chars {
        return None;
    }

    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(&format!("\n... [{} characters elided]", total - max_chars));
    Some(truncated)
}

impl HistoryTransform for ToolResultSummarizer {
    fn name(&self) -> &'static str {
        "tool_result_summarizer"
    }

    fn apply(&self, mut messages: Vec<Message>) -> Vec<Message> {
        for message in messages.iter_mut().filter(|m| m.role == Role::Tool) {
            if let Some(truncated) = truncate_with_marker(&message.content, self.max_chars) {
                message.content = truncated;
            }
        }
        messages
    }
}

/// Marks where the most recent `recent` messages begin.
#[derive(Debug, Clone)]
pub struct RecentContextMarker {
    pub recent: usize,
}

impl RecentContextMarker {
    pub fn new(recent: usize) -> Self {
        Self { recent }
    }
}

impl HistoryTransform for RecentContextMarker {
    fn name(&self) -> &'static str {
        "recent_context_marker"
    }

    fn apply(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if self.recent == 0 || messages.len() <= self.recent {
            return messages;
        }

        let start = messages.len() - self.recent;
        if let Some(message) = messages
            .iter_mut()
            .skip(start)
            .find(|m| m.role != Role::System)
            && !message.content.starts_with(RECENT_CONTEXT_MARKER)
        {
            message.content = format!("{RECENT_CONTEXT_MARKER}\n{}", message.content);
        }
        messages
    }
}

/// Collapses consecutive identical messages. Tool results only collapse when
/// they answer the same call.
#[derive(Debug, Clone, Copy)]
pub struct ConsecutiveDedup;

fn same_message(left: &Message, right: &Message) -> bool {
    left.role == right.role
        && left.content == right.content
        && left.tool_calls.len() == right.tool_calls.len()
        && left.tool_call_id == right.tool_call_id
}

impl HistoryTransform for ConsecutiveDedup {
    fn name(&self) -> &'static str {
        "consecutive_dedup"
    }

    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut deduped: Vec<Message> = Vec::with_capacity(messages.len());
        for message in messages {
            if deduped
                .last()
                .is_some_and(|previous| same_message(previous, &message))
            {
                continue;
            }
            deduped.push(message);
        }
        deduped
    }
}

/// Appends progress text to the system message of the request view.
#[derive(Debug, Clone)]
pub struct ContextInjection {
    pub text: String,
}

impl ContextInjection {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl HistoryTransform for ContextInjection {
    fn name(&self) -> &'static str {
        "context_injection"
    }

    fn apply(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if self.text.is_empty() {
            return messages;
        }
        if let Some(system) = messages.iter_mut().find(|m| m.role == Role::System) {
            system.content = format!("{}\n\n{}", system.content, self.text);
        }
        messages
    }
}

/// Once the conversation exceeds `threshold` messages, keeps every system
/// message and the `keep_recent` most recent messages.
#[derive(Debug, Clone)]
pub struct Compression {
    pub threshold: usize,
    pub keep_recent: usize,
}

impl Compression {
    pub fn new(threshold: usize, keep_recent: usize) -> Self {
        Self {
            threshold,
            keep_recent,
        }
    }
}

impl HistoryTransform for Compression {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        if messages.len() <= self.threshold {
            return messages;
        }

        let start = messages.len().saturating_sub(self.keep_recent);
        let compressed: Vec<Message> = messages
            .into_iter()
            .enumerate()
            .filter_map(|(idx, message)| {
                (idx >= start || message.role == Role::System).then_some(message)
            })
            .collect();

        tracing::debug!(
            kept = compressed.len(),
            threshold = self.threshold,
            "compressed conversation history"
        );
        compressed
    }
}

/// Drops tool results whose call is gone and tool calls whose result is gone.
#[derive(Debug, Clone, Copy)]
pub struct RepairToolPairs;

impl HistoryTransform for RepairToolPairs {
    fn name(&self) -> &'static str {
        "repair_tool_pairs"
    }

    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut seen_calls: HashSet<String> = HashSet::new();
        let mut answered: HashSet<String> = HashSet::new();

        let messages: Vec<Message> = messages
            .into_iter()
            .filter(|message| match message.role {
                Role::Assistant => {
                    seen_calls.extend(message.tool_calls.iter().map(|c| c.id.clone()));
                    true
                }
                Role::Tool => match &message.tool_call_id {
                    Some(id) if seen_calls.contains(id) => answered.insert(id.clone()),
                    _ => false,
                },
                Role::System | Role::User => true,
            })
            .collect();

        messages
            .into_iter()
            .filter_map(|mut message| {
                if message.role != Role::Assistant || !message.has_tool_calls() {
                    return Some(message);
                }
                message.tool_calls.retain(|call| answered.contains(&call.id));
                (message.has_tool_calls() || !message.content.is_empty()).then_some(message)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallRequest;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            index: 0,
            name: name.to_string(),
            arguments: "{}".to_string(),
        }
    }

    fn tool_round(id: &str, name: &str, result: &str) -> Vec<Message> {
        vec![
            Message::assistant("", vec![call(id, name)]),
            Message::tool_result(id, result),
        ]
    }

    #[test]
    fn estimate_tokens_uses_script_aware_ratios() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("修复登录"), 3);
        assert_eq!(estimate_tokens("修复 bug"), 3);
    }

    #[test]
    fn compression_keeps_system_messages_and_recent_tail() {
        let mut messages = vec![Message::system("rules")];
        for i in 1..25 {
            if i == 7 {
                messages.push(Message::system("late instructions"));
            } else if i % 2 == 0 {
                messages.push(Message::user(format!("user {i}")));
            } else {
                messages.push(Message::assistant(format!("assistant {i}"), vec![]));
            }
        }
        assert_eq!(messages.len(), 25);

        let compressed = Compression::new(20, 10).apply(messages.clone());

        assert_eq!(compressed.len(), 12);
        assert_eq!(compressed[0].content, "rules");
        assert_eq!(compressed[1].content, "late instructions");
        assert_eq!(&compressed[2..], &messages[15..]);
    }

    #[test]
    fn compression_is_a_noop_below_threshold() {
        let messages = vec![Message::system("rules"), Message::user("hi")];
        assert_eq!(Compression::new(20, 10).apply(messages.clone()), messages);
    }

    #[test]
    fn tool_filter_drops_unkept_calls_and_results() {
        let mut messages = vec![Message::system("rules"), Message::user("summarize")];
        messages.push(Message::assistant(
            "checking",
            vec![call("tc_log", "git_log"), call("tc_diff", "git_diff")],
        ));
        messages.push(Message::tool_result("tc_log", "a1b2 fix parser"));
        messages.push(Message::tool_result("tc_diff", "diff --git a/x b/x"));

        let filtered = ToolResultFilter::new(["git_log".to_string()]).apply(messages.clone());

        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered[0], messages[0]);
        assert_eq!(filtered[1], messages[1]);
        assert_eq!(filtered[2].tool_calls, vec![call("tc_log", "git_log")]);
        assert_eq!(filtered[3].tool_call_id.as_deref(), Some("tc_log"));
        assert!(
            filtered
                .iter()
                .all(|m| m.tool_call_id.as_deref() != Some("tc_diff"))
        );
    }

    #[test]
    fn tool_filter_removes_emptied_assistant_messages() {
        let messages = tool_round("tc_diff", "git_diff", "diff");
        let filtered = ToolResultFilter::new(["git_log".to_string()]).apply(messages);
        assert!(filtered.is_empty());
    }

    #[test]
    fn summarizer_truncates_long_results_only() {
        let mut messages = tool_round("tc_1", "read_file", &"x".repeat(30));
        messages.push(Message::user("y".repeat(30)));

        let summarized = ToolResultSummarizer::new(10).apply(messages);

        assert_eq!(
            summarized[1].content,
            format!("{}\n... [20 characters elided]", "x".repeat(10))
        );
        assert_eq!(summarized[2].content, "y".repeat(30));
    }

    #[test]
    fn summarizer_respects_char_boundaries() {
        let truncated = truncate_with_marker("日本語のテキスト", 3);
        assert_eq!(truncated.as_deref(), Some("日本語\n... [5 characters elided]"));
    }

    #[test]
    fn token_budget_pins_first_system_and_user_messages() {
        let messages = vec![
            Message::system("rules"),
            Message::user("task"),
            Message::assistant("a".repeat(400), vec![]),
            Message::user("b".repeat(40)),
            Message::assistant("c".repeat(40), vec![]),
        ];

        let budgeted = TokenBudget::new(25).apply(messages.clone());

        assert_eq!(budgeted.len(), 4);
        assert_eq!(budgeted[0], messages[0]);
        assert_eq!(budgeted[1], messages[1]);
        assert_eq!(budgeted[2], messages[3]);
        assert_eq!(budgeted[3], messages[4]);
    }

    #[test]
    fn token_budget_stops_at_first_message_that_does_not_fit() {
        let messages = vec![
            Message::system("rules"),
            Message::user("task"),
            Message::assistant("small", vec![]),
            Message::assistant("a".repeat(400), vec![]),
            Message::assistant("tail", vec![]),
        ];

        let budgeted = TokenBudget::new(50).apply(messages);
        let contents: Vec<&str> = budgeted.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["rules", "task", "tail"]);
    }

    #[test]
    fn dedup_collapses_identical_neighbours() {
        let messages = vec![
            Message::user("again"),
            Message::user("again"),
            Message::assistant("same", vec![]),
            Message::user("again"),
        ];
        let deduped = ConsecutiveDedup.apply(messages);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn dedup_keeps_identical_results_of_different_calls() {
        let messages = vec![
            Message::assistant("", vec![call("tc_1", "git_status"), call("tc_2", "git_status")]),
            Message::tool_result("tc_1", "clean"),
            Message::tool_result("tc_2", "clean"),
        ];
        assert_eq!(ConsecutiveDedup.apply(messages.clone()), messages);
    }

    #[test]
    fn recent_marker_annotates_first_message_of_window() {
        let messages = vec![
            Message::system("rules"),
            Message::user("one"),
            Message::assistant("two", vec![]),
            Message::user("three"),
        ];
        let marked = RecentContextMarker::new(2).apply(messages);
        assert_eq!(marked[2].content, format!("{RECENT_CONTEXT_MARKER}\ntwo"));
        assert_eq!(marked[3].content, "three");
        assert_eq!(marked[1].content, "one");
    }

    #[test]
    fn context_injection_appends_to_system_message() {
        let messages = vec![Message::system("rules"), Message::user("task")];
        let injected = ContextInjection::new("Iteration 2 of 10").apply(messages);
        assert_eq!(injected[0].content, "rules\n\nIteration 2 of 10");
        assert_eq!(injected.len(), 2);
    }

    #[test]
    fn repair_drops_orphans_and_unanswered_calls() {
        let messages = vec![
            Message::tool_result("tc_gone", "orphan"),
            Message::assistant("", vec![call("tc_1", "git_log"), call("tc_2", "git_diff")]),
            Message::tool_result("tc_1", "log"),
            Message::tool_result("tc_1", "log again"),
            Message::user("next"),
        ];

        let repaired = RepairToolPairs.apply(messages);

        assert_eq!(repaired.len(), 3);
        assert_eq!(repaired[0].tool_calls, vec![call("tc_1", "git_log")]);
        assert_eq!(repaired[1].content, "log");
        assert_eq!(repaired[2].content, "next");
    }

    #[test]
    fn pipeline_applies_transforms_in_order() {
        let pipeline = HistoryPipeline::new()
            .then(ContextInjection::new("first"))
            .then(ContextInjection::new("second"));

        let out = pipeline.apply(vec![Message::system("rules")]);
        assert_eq!(out[0].content, "rules\n\nfirst\n\nsecond");
        assert_eq!(pipeline.names(), vec!["context_injection", "context_injection"]);
    }

    #[test]
    fn persistent_pipeline_compresses_without_breaking_tool_pairs() {
        let config = HistoryConfig {
            compress_threshold: 6,
            keep_recent: 3,
            ..HistoryConfig::default()
        };

        let mut messages = vec![Message::system("rules"), Message::user("task")];
        messages.extend(tool_round("tc_1", "git_log", "log"));
        messages.extend(tool_round("tc_2", "git_diff", "diff"));
        messages.extend(tool_round("tc_3", "git_status", "status"));

        let compressed = config.persistent_pipeline().apply(messages);

        // The tail starts on tc_2's result, which loses its call and is dropped.
        let roles: Vec<Role> = compressed.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::Tool]);
        assert_eq!(compressed[2].tool_call_id.as_deref(), Some("tc_3"));
    }
}
