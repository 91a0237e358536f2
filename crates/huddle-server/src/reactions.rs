use std::sync::Arc;

use tracing::debug;

use huddle_shared::constants::MAX_EMOJI_BYTES;
use huddle_shared::protocol::{ReactionChange, ServerEvent};
use huddle_shared::types::{IdentityId, MessageId};

use crate::error::ChatError;
use crate::router::ChannelRouter;
use crate::store::SharedStore;

/// Adds or removes one identity's emoji on a message and tells the
/// conversation about it.
#[derive(Clone)]
pub struct ReactionToggle {
    store: SharedStore,
    router: Arc<ChannelRouter>,
}

impl ReactionToggle {
    pub fn new(store: SharedStore, router: Arc<ChannelRouter>) -> Self {
        Self { store, router }
    }

    /// Returns `true` if the reaction now exists.
    pub async fn toggle(
        &self,
        identity: IdentityId,
        message: MessageId,
        emoji: String,
    ) -> Result<bool, ChatError> {
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
            return Err(ChatError::BadRequest(format!(
                "emoji must be 1..={MAX_EMOJI_BYTES} bytes"
            )));
        }

        let change_emoji = emoji.clone();
        let (toggled, participants) = self
            .store
            .call(move |db| {
                let toggled = db.toggle_reaction(message, identity, &emoji)?;
                let participants = db.participant_ids(toggled.conversation_id)?;
                Ok((toggled, participants))
            })
            .await?;

        debug!(
            conversation = %toggled.conversation_id,
            %message,
            %identity,
            added = toggled.added,
            "Reaction toggled"
        );

        self.router.publish_to_conversation(
            toggled.conversation_id,
            &participants,
            ServerEvent::ReactionChanged(ReactionChange {
                conversation_id: toggled.conversation_id,
                message_id: message,
                identity_id: identity,
                emoji: change_emoji,
                added: toggled.added,
            }),
            None,
        );
        Ok(toggled.added)
    }
}
