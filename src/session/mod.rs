//! Per-user session store: user id -> bundle of role conversations.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::conversation::Conversation;
use crate::role::{AgentRole, PromptContext, TemplateError};

/// The four conversational contexts one user owns.
#[derive(Debug, Clone)]
pub struct SessionBundle {
    pub analyst: Conversation,
    pub evaluator: Conversation,
    pub rewriter: Conversation,
    pub summarizer: Conversation,
}

impl SessionBundle {
    pub fn new(ctx: &PromptContext, memory_size: usize) -> Result<Self, TemplateError> {
        Ok(Self {
            analyst: AgentRole::Analyst.conversation(ctx, memory_size)?,
            evaluator: AgentRole::Evaluator.conversation(ctx, memory_size)?,
            rewriter: AgentRole::Rewriter.conversation(ctx, memory_size)?,
            summarizer: AgentRole::Summarizer.conversation(ctx, memory_size)?,
        })
    }
}

/// Locking the handle serializes requests of the same user; different users
/// never contend.
pub type SessionHandle = Arc<Mutex<SessionBundle>>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, user_id: &str) -> Result<SessionHandle, TemplateError>;
}

/// Process-lifetime store. The map shards its locks, so creating a session
/// for one user only blocks lookups that hash to the same shard.
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionHandle>,
    prompt: PromptContext,
    memory_size: usize,
}

impl InMemorySessionStore {
    pub fn new(prompt: PromptContext, memory_size: usize) -> Self {
        Self { sessions: DashMap::new(), prompt, memory_size }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, user_id: &str) -> Result<SessionHandle, TemplateError> {
        if let Some(existing) = self.sessions.get(user_id) {
            return Ok(existing.value().clone());
        }
        // The entry guard covers the existence check and the insertion only.
        let handle = match self.sessions.entry(user_id.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                info!("creating session for user {}", user_id);
                let bundle = SessionBundle::new(&self.prompt, self.memory_size)?;
                e.insert(Arc::new(Mutex::new(bundle))).value().clone()
            }
        };
        Ok(handle)
    }
}
