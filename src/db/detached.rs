//! Store used when no database is configured

use async_trait::async_trait;

use super::{ConversationStore, ConversationTurn};
use crate::{Error, Result};

/// A store with no connection: nothing is written, history is always empty
#[derive(Debug, Default)]
pub struct DetachedStore;

#[async_trait(?Send)]
impl ConversationStore for DetachedStore {
    async fn record_turn(&mut self, _user_message: &str, _assistant_response: &str) -> Result<()> {
        Err(Error::PersistenceUnavailable(
            "no database connection configured".to_string(),
        ))
    }

    async fn recent_turns(&mut self, _limit: usize) -> Vec<ConversationTurn> {
        Vec::new()
    }

    async fn close(&mut self) {}

    fn backend(&self) -> &'static str {
        "detached"
    }
}
