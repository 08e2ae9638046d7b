//! `/dice [opponent]` - roll a six-sided die, optionally as a challenge.

use async_trait::async_trait;
use rand::Rng;

use super::{CommandContext, CommandHandler, CommandResult};
use crate::envelope::{MessageEnvelope, MessageType};

pub struct DiceHandler;

#[async_trait]
impl CommandHandler for DiceHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let room_id = &ctx.invoker.room_id;

        let content = match ctx.param(0) {
            None => {
                // No opponent is a plain roll, not an error.
                let roll = roll_die();
                format!("{} rolled a {}", ctx.invoker.username, roll)
            }
            Some(opponent) => match ctx.rooms.member_identity(room_id, opponent).await {
                // An absent opponent degrades to a plain roll, like an
                // absent mention.
                None => {
                    let roll = roll_die();
                    format!(
                        "{} rolled a {} ({} is not here to answer)",
                        ctx.invoker.username, roll, opponent
                    )
                }
                Some(opponent) => {
                    let (mine, theirs) = (roll_die(), roll_die());
                    let verdict = match mine.cmp(&theirs) {
                        std::cmp::Ordering::Greater => format!("{} wins", ctx.invoker.username),
                        std::cmp::Ordering::Less => format!("{} wins", opponent.username),
                        std::cmp::Ordering::Equal => "a draw".to_string(),
                    };
                    format!(
                        "{} rolled {} against {}'s {}: {}",
                        ctx.invoker.username, mine, opponent.username, theirs, verdict
                    )
                }
            },
        };

        let result =
            MessageEnvelope::server(MessageType::TextMessage, room_id, ctx.server_name, content);
        ctx.rooms.broadcast(room_id, &result, true, None).await;
        Ok(())
    }
}

fn roll_die() -> u32 {
    rand::thread_rng().gen_range(1..=6)
}
