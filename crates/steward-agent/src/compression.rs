//! Transcript compression
//!
//! Keeps the active transcript under a token budget without losing the
//! ability to retrieve what was cut. Each pass targets one role. Walking the
//! transcript newest-first, the newest message of that role is truncated
//! middle-out if oversized; every older oversized one is cut down to a prefix
//! plus a pointer to its id, whose full content lives in the blob store.

use serde::{Deserialize, Serialize};
use steward_ai::{Content, Message, Role};

/// Ceiling used when a pass is configured with `max_tokens == 0`
pub const DEFAULT_MAX_TOKENS: u32 = 100_000;

/// Absolute character cap for middle-out truncation
pub const MIDDLE_OUT_CEILING: usize = 100_000;

/// Characters reserved for the markers inserted by middle-out truncation
const MIDDLE_OUT_RESERVE: usize = 150;

pub const MIDDLE_MARKER: &str = "\n\n... (middle truncated) ...\n\n";
pub const RESTATE_NOTE: &str =
    "\n\nThis message is too long, repeat relevant information in your response to remember it";
pub const TRUNCATED_MARKER: &str = "... (truncated)";

/// Which messages a pass is allowed to touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    /// Tool-result messages
    Tool,
    /// User messages
    Human,
    /// Assistant messages
    Ai,
}

impl RoleFilter {
    pub fn matches(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (RoleFilter::Tool, Role::ToolResult)
                | (RoleFilter::Human, Role::User)
                | (RoleFilter::Ai, Role::Assistant)
        )
    }
}

/// Budget parameters for a single compression pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPass {
    pub target: RoleFilter,
    pub max_tokens: u32,
    pub single_message_threshold: u32,
}

impl CompressionPass {
    pub fn new(target: RoleFilter, max_tokens: u32, single_message_threshold: u32) -> Self {
        Self {
            target,
            max_tokens,
            single_message_threshold,
        }
    }

    /// Tool results first, then user turns, then assistant turns
    pub fn default_passes() -> Vec<Self> {
        vec![
            Self::new(RoleFilter::Tool, 12_800, 1024),
            Self::new(RoleFilter::Human, 12_800, 1024),
            Self::new(RoleFilter::Ai, 12_800, 1025),
        ]
    }
}

/// What a pass did to the transcript
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub tokens_before: u32,
    pub tokens_after: u32,
    /// Ids of messages truncated middle-out
    pub middle_out: Vec<String>,
    /// Ids of messages replaced by a prefix and pointer
    pub pointers: Vec<String>,
}

impl CompressionReport {
    pub fn changed(&self) -> bool {
        !self.middle_out.is_empty() || !self.pointers.is_empty()
    }
}

// --- Token Estimation ---

/// Estimate token count for a single message (chars/4 heuristic)
pub fn estimate_tokens(message: &Message) -> u32 {
    (content_char_count(message.content()) / 4) as u32
}

/// Estimate total tokens for a slice of messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

fn content_char_count(content: &[Content]) -> usize {
    content
        .iter()
        .map(|c| match c {
            Content::Text { text } => text.chars().count(),
            Content::Thinking { thinking } => thinking.chars().count(),
            Content::ToolCall {
                name, arguments, ..
            } => name.chars().count() + arguments.to_string().chars().count(),
            Content::Image { .. } => 4800, // ~1200 tokens * 4 chars/token
        })
        .sum()
}

// --- Compression ---

/// Run one pass with the given budget over `messages`, editing content in place.
///
/// Below budget this is a no-op. Messages are never added, removed or
/// reordered, and messages without text blocks are skipped.
pub fn compress(
    messages: &mut [Message],
    max_tokens: u32,
    single_message_threshold: u32,
    role_filter: RoleFilter,
) -> CompressionReport {
    let max_tokens = if max_tokens == 0 {
        DEFAULT_MAX_TOKENS
    } else {
        max_tokens
    };

    let tokens_before = estimate_total_tokens(messages);
    let mut report = CompressionReport {
        tokens_before,
        tokens_after: tokens_before,
        ..Default::default()
    };
    if tokens_before <= max_tokens {
        return report;
    }

    let mut visit_rank = 0usize;
    for msg in messages.iter_mut().rev() {
        if !role_filter.matches(msg.role()) {
            continue;
        }
        visit_rank += 1;

        if estimate_tokens(msg) <= single_message_threshold || !msg.has_text() {
            continue;
        }

        let text = msg.text();
        if visit_rank == 1 {
            let budget = (max_tokens as usize * 2).min(MIDDLE_OUT_CEILING);
            if let Some(cut) = middle_out(&text, budget) {
                msg.set_text(cut);
                report.middle_out.push(msg.id().to_string());
            }
        } else {
            let budget = single_message_threshold as usize * 3;
            if let Some(cut) = pointer_form(&text, msg.id(), budget) {
                msg.set_text(cut);
                report.pointers.push(msg.id().to_string());
            }
        }
    }

    if report.changed() {
        report.tokens_after = estimate_total_tokens(messages);
    }
    report
}

/// Run every pass in order, returning one report per pass.
pub fn compress_all(
    messages: &mut [Message],
    passes: &[CompressionPass],
) -> Vec<(RoleFilter, CompressionReport)> {
    passes
        .iter()
        .map(|pass| {
            let report = compress(
                messages,
                pass.max_tokens,
                pass.single_message_threshold,
                pass.target,
            );
            (pass.target, report)
        })
        .collect()
}

/// Keep a prefix and suffix of `text` within `max_chars`, or `None` if it already fits.
pub fn middle_out(text: &str, max_chars: usize) -> Option<String> {
    let max_chars = max_chars.min(MIDDLE_OUT_CEILING);
    if text.chars().count() <= max_chars {
        return None;
    }

    let keep = max_chars.saturating_sub(MIDDLE_OUT_RESERVE);
    let head = keep / 2;
    let tail = keep - head;

    let mut out = String::with_capacity(keep * 4 + MIDDLE_MARKER.len() + RESTATE_NOTE.len());
    out.push_str(char_prefix(text, head));
    out.push_str(MIDDLE_MARKER);
    out.push_str(char_suffix(text, tail));
    out.push_str(RESTATE_NOTE);
    Some(out)
}

/// Cut `text` to `max_chars` and point at the parked original, or `None` if it fits.
pub fn pointer_form(text: &str, message_id: &str, max_chars: usize) -> Option<String> {
    if text.chars().count() <= max_chars {
        return None;
    }
    Some(format!(
        "{}{}\n\nmessage_id \"{}\"\nUse expand_message tool to see contents",
        char_prefix(text, max_chars),
        TRUNCATED_MARKER,
        message_id
    ))
}

/// First `n` chars of `s`
fn char_prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `n` chars of `s`
fn char_suffix(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
