use crate::events::AgentEvent;

/// UI projection of where the agent loop is. Recomputable from the event
/// stream alone; never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub current_turn: usize,
    pub max_turns: usize,
    pub active_tool: Option<String>,
}

impl ProgressState {
    /// Fold one event into the state.
    pub fn apply(&self, event: &AgentEvent) -> ProgressState {
        match event {
            AgentEvent::TurnStart { turn, max_turns } => ProgressState {
                current_turn: *turn,
                max_turns: *max_turns,
                active_tool: None,
            },
            AgentEvent::ToolCall { tool_name, .. } => ProgressState {
                active_tool: Some(tool_name.clone()),
                ..self.clone()
            },
            AgentEvent::ToolResult { .. } => ProgressState {
                active_tool: None,
                ..self.clone()
            },
            AgentEvent::TextDelta { .. } | AgentEvent::Finish { .. } | AgentEvent::Error { .. } => {
                self.clone()
            }
        }
    }

    /// Replay a whole event sequence from the initial state.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a AgentEvent>) -> ProgressState {
        events
            .into_iter()
            .fold(ProgressState::default(), |state, event| state.apply(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TokenUsage;
    use crate::tools::ToolResult;
    use serde_json::json;

    fn busy(tool: &str) -> ProgressState {
        ProgressState {
            current_turn: 1,
            max_turns: 40,
            active_tool: Some(tool.into()),
        }
    }

    #[test]
    fn initial_state_is_turn_zero() {
        let state = ProgressState::default();
        assert_eq!(state.current_turn, 0);
        assert_eq!(state.max_turns, 0);
        assert!(state.active_tool.is_none());
    }

    #[test]
    fn turn_start_resets_active_tool() {
        let next = busy("bash").apply(&AgentEvent::TurnStart {
            turn: 2,
            max_turns: 40,
        });
        assert_eq!(
            next,
            ProgressState {
                current_turn: 2,
                max_turns: 40,
                active_tool: None
            }
        );
    }

    #[test]
    fn tool_call_then_result() {
        let state = ProgressState {
            current_turn: 1,
            max_turns: 40,
            active_tool: None,
        };
        let calling = state.apply(&AgentEvent::ToolCall {
            tool_name: "read_file".into(),
            input: json!({"file_path": "/tmp/foo"}),
            call_id: "tc-1".into(),
        });
        assert_eq!(calling.active_tool.as_deref(), Some("read_file"));

        let done = calling.apply(&AgentEvent::ToolResult {
            tool_name: "read_file".into(),
            call_id: "tc-1".into(),
            result: ToolResult::ok("ok"),
        });
        assert_eq!(done, state);
    }

    #[test]
    fn text_and_finish_leave_state_alone() {
        let state = busy("bash");
        assert_eq!(
            state.apply(&AgentEvent::TextDelta {
                text: "hello".into()
            }),
            state
        );
        assert_eq!(
            state.apply(&AgentEvent::Finish {
                usage: TokenUsage::new(100, 50)
            }),
            state
        );
    }

    #[test]
    fn replay_tracks_the_latest_turn() {
        let events = vec![
            AgentEvent::TurnStart {
                turn: 1,
                max_turns: 3,
            },
            AgentEvent::ToolCall {
                tool_name: "bash".into(),
                input: json!({}),
                call_id: "a".into(),
            },
            AgentEvent::TurnStart {
                turn: 2,
                max_turns: 3,
            },
            AgentEvent::ToolCall {
                tool_name: "grep".into(),
                input: json!({}),
                call_id: "b".into(),
            },
        ];
        let state = ProgressState::replay(&events);
        assert_eq!(state.current_turn, 2);
        assert_eq!(state.max_turns, 3);
        assert_eq!(state.active_tool.as_deref(), Some("grep"));
    }
}
