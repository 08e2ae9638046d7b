//! `/help` - list the commands the invoker's role may run.

use async_trait::async_trait;
use std::fmt::Write;

use super::roster::private_reply;
use super::{CommandContext, CommandHandler, CommandResult};
use crate::envelope::{MessageEnvelope, MessageType};

pub struct HelpHandler;

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let mut text = String::from("available commands:\n");
        for descriptor in ctx.registry.visible_to(ctx.role) {
            let _ = write!(text, "/{}", descriptor.name);
            for param in descriptor.param_names {
                let _ = write!(text, " <{param}>");
            }
            let _ = writeln!(text, " - {}", descriptor.summary);
        }

        let reply = MessageEnvelope::server(
            MessageType::TextMessage,
            &ctx.invoker.room_id,
            ctx.server_name,
            text,
        );
        private_reply(ctx, &reply).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_registry;
    use crate::auth::Role;
    use crate::commands::CommandRegistry;
    use crate::state::ClientIdentity;
    use crate::transport::{ConnectionHandle, MpscHandle};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_help_lists_only_permitted_commands() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, mut a_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        rooms.join(alice.clone(), a_conn.clone()).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        registry
            .invoke("help", &[], &alice, Role::Student, &conn, &rooms, "srv")
            .await
            .unwrap();

        let frame = a_rx.try_recv().unwrap();
        assert!(frame.contains("/dice"));
        assert!(frame.contains("/away"));
        assert!(!frame.contains("/kick"));
        assert!(!frame.contains("/announce"));
    }
}
