//! Conversational context: one fixed system instruction plus a sliding window
//! of role-tagged turns.

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;

use crate::llm::{ChatMessage, Role};

/// Default number of non-system turns a context keeps.
pub const DEFAULT_MEMORY_SIZE: usize = 2;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("turn is missing the `{0}` field")]
    MissingField(&'static str),
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("role `{role}` is not allowed here; allowed roles are: {allowed}")]
    RoleNotAllowed { role: &'static str, allowed: String },
    #[error("turn content is empty")]
    EmptyContent,
}

/// A single role-tagged message. Only constructible through validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self, TurnError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(TurnError::EmptyContent);
        }
        Ok(Self { role, content })
    }

    pub fn user(content: impl Into<String>) -> Result<Self, TurnError> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Result<Self, TurnError> {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

impl TryFrom<&Value> for Turn {
    type Error = TurnError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let role = value
            .get("role")
            .and_then(Value::as_str)
            .ok_or(TurnError::MissingField("role"))?;
        let content = value
            .get("content")
            .and_then(Value::as_str)
            .ok_or(TurnError::MissingField("content"))?;
        let role = Role::parse(role).ok_or_else(|| TurnError::UnknownRole(role.to_string()))?;
        Turn::new(role, content)
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    system: String,
    turns: VecDeque<Turn>,
    memory_size: usize,
    allowed: &'static [Role],
}

impl Conversation {
    pub const CHAT_ROLES: &'static [Role] = &[Role::User, Role::Assistant];
    pub const CODE_ROLES: &'static [Role] =
        &[Role::User, Role::Assistant, Role::Code, Role::CodeResult];

    pub fn new(system: impl Into<String>) -> Self {
        Self::with_roles(system, Self::CHAT_ROLES, DEFAULT_MEMORY_SIZE)
    }

    pub fn with_roles(system: impl Into<String>, allowed: &'static [Role], memory_size: usize) -> Self {
        Self {
            system: system.into(),
            turns: VecDeque::new(),
            memory_size,
            allowed,
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn. The system instruction lives outside the window and can
    /// never be appended.
    pub fn append(&mut self, turn: Turn) -> Result<(), TurnError> {
        if !self.allowed.contains(&turn.role) {
            return Err(TurnError::RoleNotAllowed {
                role: turn.role.as_str(),
                allowed: self
                    .allowed
                    .iter()
                    .map(Role::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        self.turns.push_back(turn);
        Ok(())
    }

    /// Keep only the last `memory_size` turns.
    pub fn trim(&mut self) {
        while self.turns.len() > self.memory_size {
            self.turns.pop_front();
        }
    }

    /// System instruction, then the retained window, then `extra_user` if
    /// given. Stored history is not touched; turns beyond the window are left
    /// out of the prompt even before `trim` runs.
    pub fn snapshot_for_prompt(&self, extra_user: Option<&str>) -> Vec<ChatMessage> {
        let skip = self.turns.len().saturating_sub(self.memory_size);
        let mut messages = Vec::with_capacity(self.memory_size + 2);
        messages.push(ChatMessage::new(Role::System, self.system.clone()));
        messages.extend(self.turns.iter().skip(skip).map(Turn::to_message));
        if let Some(text) = extra_user {
            messages.push(ChatMessage::new(Role::User, text));
        }
        messages
    }

    /// Replace the stored turns with another context's turns, keeping this
    /// context's system instruction and role set.
    pub fn replace_history_from(&mut self, other: &Conversation) -> Result<(), TurnError> {
        self.turns.clear();
        for turn in other.turns() {
            self.append(turn.clone())?;
        }
        self.trim();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn window_keeps_last_n_and_system_first() {
        let mut conv = Conversation::new("sys");
        for total in 1..=7usize {
            let turn = if total % 2 == 0 {
                Turn::assistant(format!("a{}", total)).unwrap()
            } else {
                Turn::user(format!("u{}", total)).unwrap()
            };
            conv.append(turn).unwrap();
            conv.trim();
            assert_eq!(conv.len(), total.min(conv.memory_size()));
            let snap = conv.snapshot_for_prompt(None);
            assert_eq!(snap[0].role, Role::System);
            assert_eq!(snap[0].content, "sys");
        }
        let contents: Vec<_> = conv.turns().map(|t| t.content().to_string()).collect();
        assert_eq!(contents, vec!["a6", "u7"]);
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let mut conv = Conversation::with_roles("sys", Conversation::CHAT_ROLES, 1);
        conv.append(Turn::user("first").unwrap()).unwrap();
        conv.append(Turn::assistant("second").unwrap()).unwrap();
        let snap = conv.snapshot_for_prompt(Some("next"));
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[1].content, "second");
        assert_eq!(snap[2], ChatMessage::new(Role::User, "next"));
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn rejects_disallowed_roles() {
        let mut conv = Conversation::new("sys");
        let err = conv.append(Turn::new(Role::Code, "x = 1").unwrap()).unwrap_err();
        assert!(matches!(err, TurnError::RoleNotAllowed { role: "code", .. }));
        let err = conv.append(Turn::new(Role::System, "override").unwrap()).unwrap_err();
        assert!(matches!(err, TurnError::RoleNotAllowed { role: "system", .. }));
        assert!(conv.is_empty());

        let mut code_conv = Conversation::with_roles("sys", Conversation::CODE_ROLES, 4);
        code_conv.append(Turn::new(Role::CodeResult, "42").unwrap()).unwrap();
        assert_eq!(code_conv.len(), 1);
    }

    #[test]
    fn malformed_json_turns_never_construct() {
        assert_eq!(
            Turn::try_from(&json!({"content": "hi"})).unwrap_err(),
            TurnError::MissingField("role")
        );
        assert_eq!(
            Turn::try_from(&json!({"role": "user"})).unwrap_err(),
            TurnError::MissingField("content")
        );
        assert_eq!(
            Turn::try_from(&json!({"role": "narrator", "content": "hi"})).unwrap_err(),
            TurnError::UnknownRole("narrator".into())
        );
        assert_eq!(Turn::user("   ").unwrap_err(), TurnError::EmptyContent);
        let ok = Turn::try_from(&json!({"role": "assistant", "content": "hi"})).unwrap();
        assert_eq!(ok.role(), Role::Assistant);
    }

    #[test]
    fn history_copy_respects_target_roles() {
        let mut analyst = Conversation::new("analyst");
        analyst.append(Turn::user("q").unwrap()).unwrap();
        analyst.append(Turn::assistant("code").unwrap()).unwrap();
        let mut rewriter = Conversation::new("rewriter");
        rewriter.append(Turn::user("stale").unwrap()).unwrap();
        rewriter.replace_history_from(&analyst).unwrap();
        assert_eq!(rewriter.system(), "rewriter");
        let contents: Vec<_> = rewriter.turns().map(Turn::content).collect();
        assert_eq!(contents, vec!["q", "code"]);
    }
}
