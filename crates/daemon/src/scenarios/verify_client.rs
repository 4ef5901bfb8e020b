//! Cross-signing verification between two sessions of one user

use crate::scenario::{Scenario, ScenarioContext, TestDefinition};
use async_trait::async_trait;
use trafficlight_common::{CapabilityType, Result, ServerType};

/// Two sessions of the same user cross-sign each other
pub struct VerifyClient;

#[async_trait]
impl Scenario for VerifyClient {
    fn name(&self) -> &str {
        "verify_client"
    }

    fn definition(&self) -> TestDefinition {
        let candidates = [CapabilityType::ElementWeb, CapabilityType::ElementAndroid];
        TestDefinition::new()
            .client("alice", candidates)
            .client("bob", candidates)
            .servers(ServerType::SynapseDevelop, &["server"])
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let alice = ctx.client("alice")?;
        let bob = ctx.client("bob")?;
        let server = ctx.server("server")?;

        alice.register(&server).await?;
        // bob is alice's second device
        bob.use_credentials(alice.credentials());
        bob.login(&server).await?;
        bob.start_crosssign().await?;
        alice.accept_crosssign().await?;
        tokio::try_join!(alice.verify_crosssign(), bob.verify_crosssign())?;
        Ok(())
    }
}
