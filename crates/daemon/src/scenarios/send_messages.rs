//! One client registers, creates a room and sends a message

use crate::scenario::{Scenario, ScenarioContext, TestDefinition};
use async_trait::async_trait;
use trafficlight_common::{CapabilityType, Result, ServerType};

/// Register, create a room and send one message
pub struct SendMessages;

#[async_trait]
impl Scenario for SendMessages {
    fn name(&self) -> &str {
        "send_messages"
    }

    fn definition(&self) -> TestDefinition {
        TestDefinition::new()
            .client(
                "client_one",
                [CapabilityType::ElementWeb, CapabilityType::ElementAndroid],
            )
            .servers(ServerType::SynapseStable, &["server"])
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let client_one = ctx.client("client_one")?;
        let server = ctx.server("server")?;

        client_one.register(&server).await?;
        client_one.create_room("little test room").await?;
        client_one.send_message("hi there!").await?;
        Ok(())
    }
}
