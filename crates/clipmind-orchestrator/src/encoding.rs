//! Pairing tool results with pending calls and encoding them into the
//! conversation for a specific backend.

use clipmind_llm::{
    tool_result_summary, ContentPart, DynProvider, Message, Role, ToolCall, ToolResultEncoding,
};
use clipmind_types::{ClipmindError, Result};
use serde::Serialize;

use crate::ToolResult;

/// A tool result matched to the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairedResult {
    pub call: ToolCall,
    pub result: ToolResult,
}

impl PairedResult {
    /// The result as it travels on the wire.
    pub fn serialized(&self) -> String {
        self.result.result.to_string()
    }
}

/// Match every result to exactly one pending call.
///
/// Results are taken positionally when their names line up with the pending
/// calls; otherwise each result claims the first unmatched call of the same
/// name. Missing, extra or unknown results are rejected.
pub fn pair_results(pending: &[ToolCall], results: Vec<ToolResult>) -> Result<Vec<PairedResult>> {
    if results.len() != pending.len() {
        return Err(ClipmindError::ToolResultMismatch(format!(
            "expected {} result(s), got {}",
            pending.len(),
            results.len()
        )));
    }

    let positional = pending
        .iter()
        .zip(&results)
        .all(|(call, result)| call.name == result.tool_name);
    if positional {
        return Ok(pending
            .iter()
            .cloned()
            .zip(results)
            .map(|(call, result)| PairedResult { call, result })
            .collect());
    }

    let mut claimed = vec![false; pending.len()];
    let mut paired = Vec::with_capacity(results.len());
    for result in results {
        let index = (0..pending.len())
            .find(|&i| !claimed[i] && pending[i].name == result.tool_name)
            .ok_or_else(|| {
                ClipmindError::ToolResultMismatch(format!(
                    "no pending call to '{}' left to answer",
                    result.tool_name
                ))
            })?;
        claimed[index] = true;
        paired.push((index, result));
    }
    // Equal lengths and one distinct claim per result cover every call.
    paired.sort_by_key(|(index, _)| *index);
    Ok(paired
        .into_iter()
        .map(|(index, result)| PairedResult {
            call: pending[index].clone(),
            result,
        })
        .collect())
}

/// How results must be encoded for `adapter`, routed under chain `identity`.
/// Structured blocks are only usable on the backend that issued the call ids.
pub fn encoding_for(
    identity: &str,
    adapter: &DynProvider,
    origin: Option<&str>,
) -> ToolResultEncoding {
    match adapter.tool_result_encoding() {
        ToolResultEncoding::Structured if origin == Some(identity) => {
            ToolResultEncoding::Structured
        }
        _ => ToolResultEncoding::TextSummary,
    }
}

/// The single message that carries `results` back to the model.
pub fn results_message(encoding: ToolResultEncoding, results: &[PairedResult]) -> Message {
    match encoding {
        ToolResultEncoding::Structured => Message::with_parts(
            Role::User,
            results
                .iter()
                .map(|p| ContentPart::ToolResult {
                    tool_call_id: p.call.id.clone(),
                    tool_name: p.call.name.clone(),
                    content: p.serialized(),
                    is_error: p.result.is_error,
                })
                .collect(),
        ),
        ToolResultEncoding::TextSummary => Message::assistant(
            results
                .iter()
                .map(|p| tool_result_summary(&p.call.name, &p.serialized()))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }
}

/// The conversation as `encoding` can carry it: unchanged for structured
/// backends, tool parts flattened to text otherwise.
pub fn conversation_for(encoding: ToolResultEncoding, conversation: &[Message]) -> Vec<Message> {
    match encoding {
        ToolResultEncoding::Structured => conversation.to_vec(),
        ToolResultEncoding::TextSummary => conversation
            .iter()
            .map(Message::without_tool_parts)
            .collect(),
    }
}

/// The assistant message recording the model's tool request.
pub fn tool_request_message(text: &str, calls: &[ToolCall]) -> Message {
    let mut parts = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.into() });
    }
    parts.extend(calls.iter().map(|c| ContentPart::ToolCall {
        id: c.id.clone(),
        name: c.name.clone(),
        arguments: c.arguments.clone(),
    }));
    Message::with_parts(Role::Assistant, parts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: json!({}),
        }
    }

    #[test]
    fn positional_pairing_when_names_line_up() {
        let pending = [call("c1", "trim"), call("c2", "trim")];
        let paired = pair_results(
            &pending,
            vec![ToolResult::ok("trim", json!(1)), ToolResult::ok("trim", json!(2))],
        )
        .unwrap();
        assert_eq!(paired[0].call.id, "c1");
        assert_eq!(paired[0].result.result, json!(1));
        assert_eq!(paired[1].call.id, "c2");
    }

    #[test]
    fn out_of_order_results_pair_by_name() {
        let pending = [call("c1", "seek_to_time"), call("c2", "add_caption")];
        let paired = pair_results(
            &pending,
            vec![
                ToolResult::ok("add_caption", json!("done")),
                ToolResult::ok("seek_to_time", json!(30)),
            ],
        )
        .unwrap();
        assert_eq!(paired[0].call.id, "c1");
        assert_eq!(paired[0].result.result, json!(30));
        assert_eq!(paired[1].call.id, "c2");
    }

    #[test]
    fn missing_extra_and_unknown_results_are_rejected() {
        let pending = [call("c1", "trim"), call("c2", "seek_to_time")];

        let missing = pair_results(&pending, vec![ToolResult::ok("trim", json!(1))]);
        assert!(matches!(missing, Err(ClipmindError::ToolResultMismatch(_))));

        let unknown = pair_results(
            &pending,
            vec![ToolResult::ok("trim", json!(1)), ToolResult::ok("render", json!(2))],
        );
        assert!(matches!(
            unknown,
            Err(ClipmindError::ToolResultMismatch(m)) if m.contains("render")
        ));

        let duplicated = pair_results(
            &pending,
            vec![ToolResult::ok("trim", json!(1)), ToolResult::ok("trim", json!(2))],
        );
        assert!(duplicated.is_err());
    }

    #[test]
    fn structured_message_is_one_user_message_keyed_by_call_id() {
        let paired = vec![PairedResult {
            call: call("toolu_1", "seek_to_time"),
            result: ToolResult::ok("seek_to_time", json!({"position": 30})),
        }];
        let msg = results_message(ToolResultEncoding::Structured, &paired);
        assert_eq!(msg.role, Role::User);
        assert_eq!(
            msg.content,
            vec![ContentPart::ToolResult {
                tool_call_id: "toolu_1".into(),
                tool_name: "seek_to_time".into(),
                content: r#"{"position":30}"#.into(),
                is_error: false,
            }]
        );
    }

    #[test]
    fn summary_message_is_one_assistant_message_with_a_line_per_result() {
        let paired = vec![
            PairedResult {
                call: call("c1", "seek_to_time"),
                result: ToolResult::ok("seek_to_time", json!(30)),
            },
            PairedResult {
                call: call("c2", "add_caption"),
                result: ToolResult::ok("add_caption", json!("ok")),
            },
        ];
        let msg = results_message(ToolResultEncoding::TextSummary, &paired);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(
            msg.plain_text(),
            "Tool seek_to_time returned: 30\nTool add_caption returned: \"ok\""
        );
    }

    #[test]
    fn summary_conversation_flattens_tool_parts() {
        let conversation = vec![
            Message::user("Go to 30s"),
            tool_request_message("", &[call("c1", "seek_to_time")]),
        ];
        let flat = conversation_for(ToolResultEncoding::TextSummary, &conversation);
        assert!(!flat[1].has_tool_parts());
        assert_eq!(flat[1].plain_text(), "[called tool seek_to_time with {}]");
        assert_eq!(
            conversation_for(ToolResultEncoding::Structured, &conversation),
            conversation
        );
    }

    #[test]
    fn tool_request_message_keeps_text_before_calls() {
        let msg = tool_request_message("Seeking now.", &[call("c1", "seek_to_time")]);
        assert_eq!(msg.role, Role::Assistant);
        assert!(matches!(msg.content[0], ContentPart::Text { .. }));
        assert!(matches!(msg.content[1], ContentPart::ToolCall { .. }));
    }
}
