//! Network proxy smoke test that finishes at once

use crate::scenario::{Scenario, ScenarioContext, TestDefinition};
use async_trait::async_trait;
use std::time::Duration;
use trafficlight_common::{CapabilityType, Result, ServerType};

/// Point a proxy at the server and finish straight away.
///
/// Used to check by hand that adapters restart cleanly after `exit`.
pub struct ExitImmediately {
    pub linger: Duration,
}

impl Default for ExitImmediately {
    fn default() -> Self {
        Self {
            linger: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Scenario for ExitImmediately {
    fn name(&self) -> &str {
        "exit_immediately"
    }

    fn definition(&self) -> TestDefinition {
        TestDefinition::new()
            .client("alice", [CapabilityType::ElementWeb])
            .network_proxy("network_proxy")
            .servers(ServerType::SynapseDevelop, &["server"])
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        ctx.client("alice")?;
        let network_proxy = ctx.client("network_proxy")?;
        let server = ctx.server("server")?;

        network_proxy.proxy_to(&server).await?;
        tokio::time::sleep(self.linger).await;
        Ok(())
    }
}
