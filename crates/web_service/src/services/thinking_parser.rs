//! Thinking-tag parser
//!
//! Splits a token stream into an answer lane and a thinking lane without
//! buffering. Tokens inside a thinking region are emitted optimistically to
//! the main lane tagged `is_pending_thinking`; when the region closes, a
//! single `move_to_thinking` tells the client to relocate exactly those
//! tokens. The server tracks the emitted token sequence, so the relocation is
//! deterministic.
//!
//! Tag boundaries can straddle tokens. A suffix of the accumulated text that
//! could still grow into a tag is held back rather than emitted, which keeps
//! tag fragments out of both lanes.

use uuid::Uuid;

use chat_core::model_profile::ModelProfile;

#[derive(Debug, Clone, PartialEq)]
pub enum ParserOutput {
    /// A token for the main lane
    Stream {
        text: String,
        message_id: Option<Uuid>,
        is_pending_thinking: bool,
    },
    /// Relocate the listed tokens from the main lane to the thinking lane
    MoveToThinking {
        content: String,
        message_id: Uuid,
        pending_tokens: Vec<String>,
    },
    /// No more thinking tokens will arrive
    ThinkingComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    ThinkStart,
    ResponseStart,
}

pub struct ThinkingParser {
    profile: ModelProfile,
    full_content: String,
    has_thinking_started: bool,
    is_in_thinking: bool,
    has_response_started: bool,
    is_in_response_tags: bool,
    pending_thinking_tokens: Vec<String>,
    thinking_content: String,
    thinking_message_id: Option<Uuid>,
    /// Unemitted tail that may still complete a tag
    hold: String,
}

impl ThinkingParser {
    pub fn new(profile: ModelProfile) -> Self {
        Self {
            profile,
            full_content: String::new(),
            has_thinking_started: false,
            is_in_thinking: false,
            has_response_started: false,
            is_in_response_tags: false,
            pending_thinking_tokens: Vec::new(),
            thinking_content: String::new(),
            thinking_message_id: None,
            hold: String::new(),
        }
    }

    pub fn full_content(&self) -> &str {
        &self.full_content
    }

    /// Thinking text emitted optimistically but never relocated, present when
    /// the stream ended inside an unterminated thinking region
    pub fn unclosed_thinking(&self) -> Option<&str> {
        (self.is_in_thinking && !self.thinking_content.is_empty())
            .then_some(self.thinking_content.as_str())
    }

    pub fn feed(&mut self, token: &str) -> Vec<ParserOutput> {
        self.full_content.push_str(token);

        if !self.profile.supports_thinking {
            return vec![ParserOutput::Stream {
                text: token.to_string(),
                message_id: None,
                is_pending_thinking: false,
            }];
        }

        let mut buf = std::mem::take(&mut self.hold);
        buf.push_str(token);
        let mut out = Vec::new();
        self.consume(buf, &mut out);
        out
    }

    /// Flush any held-back text at end of stream
    pub fn finish(&mut self) -> Vec<ParserOutput> {
        let tail = std::mem::take(&mut self.hold);
        if tail.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        if self.is_in_thinking {
            self.emit_pending(tail, &mut out);
        } else {
            out.push(self.plain(tail));
        }
        out
    }

    fn consume(&mut self, mut buf: String, out: &mut Vec<ParserOutput>) {
        loop {
            if buf.is_empty() {
                return;
            }

            if self.is_in_thinking {
                let terminator = self.thinking_terminator().to_string();
                if let Some(pos) = buf.find(&terminator) {
                    if pos > 0 {
                        let tail = buf[..pos].to_string();
                        self.emit_pending(tail, out);
                    }
                    let rest = buf[pos + terminator.len()..].to_string();
                    self.close_thinking(out);
                    if self.profile.thinking_ends_on_response_start() {
                        self.has_response_started = true;
                        self.is_in_response_tags = true;
                    }
                    buf = rest;
                    continue;
                }
                let (emit, hold) = split_holdback(&buf, &[&terminator]);
                if !emit.is_empty() {
                    self.emit_pending(emit, out);
                }
                self.hold = hold;
                return;
            }

            if self.is_in_response_tags {
                let markers: Vec<String> = self
                    .profile
                    .response_end_markers()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if markers.is_empty() {
                    out.push(self.plain(buf));
                    return;
                }
                let hit = markers
                    .iter()
                    .filter_map(|m| buf.find(m.as_str()).map(|pos| (pos, m.len())))
                    .min_by_key(|(pos, _)| *pos);
                if let Some((pos, marker_len)) = hit {
                    if pos > 0 {
                        let before = buf[..pos].to_string();
                        out.push(self.plain(before));
                    }
                    self.is_in_response_tags = false;
                    buf = buf[pos + marker_len..].to_string();
                    continue;
                }
                let watched: Vec<&str> = markers.iter().map(String::as_str).collect();
                let (emit, hold) = split_holdback(&buf, &watched);
                if !emit.is_empty() {
                    out.push(self.plain(emit));
                }
                self.hold = hold;
                return;
            }

            // Normal lane: watch for whichever opening tag comes first
            let think_tag = (!self.has_thinking_started
                && !self.profile.think_start.is_empty())
            .then(|| self.profile.think_start.clone());
            let response_tag = (!self.has_response_started
                && !self.profile.response_start.is_empty())
            .then(|| self.profile.response_start.clone());

            let hit = [
                think_tag.as_deref().map(|t| (t, TagKind::ThinkStart)),
                response_tag.as_deref().map(|t| (t, TagKind::ResponseStart)),
            ]
            .into_iter()
            .flatten()
            .filter_map(|(tag, kind)| buf.find(tag).map(|pos| (pos, tag.len(), kind)))
            .min_by_key(|(pos, _, _)| *pos);

            if let Some((pos, tag_len, kind)) = hit {
                if pos > 0 {
                    let before = buf[..pos].to_string();
                    out.push(self.plain(before));
                }
                match kind {
                    TagKind::ThinkStart => {
                        self.has_thinking_started = true;
                        self.is_in_thinking = true;
                        self.thinking_message_id = Some(Uuid::new_v4());
                    }
                    TagKind::ResponseStart => {
                        self.has_response_started = true;
                        self.is_in_response_tags = true;
                    }
                }
                buf = buf[pos + tag_len..].to_string();
                continue;
            }

            let watched: Vec<&str> = [think_tag.as_deref(), response_tag.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            let (emit, hold) = split_holdback(&buf, &watched);
            if !emit.is_empty() {
                out.push(self.plain(emit));
            }
            self.hold = hold;
            return;
        }
    }

    fn thinking_terminator(&self) -> &str {
        if self.profile.thinking_ends_on_response_start() {
            &self.profile.response_start
        } else {
            &self.profile.think_end
        }
    }

    fn plain(&self, text: String) -> ParserOutput {
        ParserOutput::Stream {
            text,
            message_id: None,
            is_pending_thinking: false,
        }
    }

    fn emit_pending(&mut self, text: String, out: &mut Vec<ParserOutput>) {
        self.thinking_content.push_str(&text);
        self.pending_thinking_tokens.push(text.clone());
        out.push(ParserOutput::Stream {
            text,
            message_id: self.thinking_message_id,
            is_pending_thinking: true,
        });
    }

    /// An empty interior means the pair is stripped silently; otherwise the
    /// relocation fires with the exact emitted token sequence.
    fn close_thinking(&mut self, out: &mut Vec<ParserOutput>) {
        self.is_in_thinking = false;
        let interior = std::mem::take(&mut self.thinking_content);
        let pending = std::mem::take(&mut self.pending_thinking_tokens);
        if !interior.is_empty() {
            out.push(ParserOutput::MoveToThinking {
                content: interior,
                message_id: self.thinking_message_id.expect("set when thinking began"),
                pending_tokens: pending,
            });
            out.push(ParserOutput::ThinkingComplete);
        }
    }
}

/// Split `buffer` into (emit, hold) where `hold` is the longest suffix of
/// `buffer` that is a proper prefix of any watched tag. Tags are ASCII, so
/// the split always lands on a char boundary.
fn split_holdback(buffer: &str, tags: &[&str]) -> (String, String) {
    let mut hold_len = 0;
    for tag in tags {
        if tag.is_empty() {
            continue;
        }
        let max = buffer.len().min(tag.len() - 1);
        for len in (hold_len + 1..=max).rev() {
            if buffer.ends_with(&tag[..len]) {
                hold_len = len;
                break;
            }
        }
    }
    let split = buffer.len() - hold_len;
    (buffer[..split].to_string(), buffer[split..].to_string())
}
