use async_trait::async_trait;
use tenantflow_core::{ContentType, Message};
use tracing::info;

use crate::messaging::MessageHandler;

/// Answers a name with a greeting, as plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloListener;

#[async_trait]
impl MessageHandler for HelloListener {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>> {
        let name: String = message.decode()?;
        info!(name = %name, "greeting requested");
        Ok(Some(Message::encode(&format!("Hello {name}"), ContentType::Text)?))
    }
}
