//! Basic two-party Element Call

use crate::client::CallData;
use crate::scenario::{ensure, Scenario, ScenarioContext, TestDefinition};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::info;
use trafficlight_common::{CapabilityType, Result, ServerType};

/// Two call clients join the same call and see each other's video
pub struct ElementCallBasic {
    /// Time given to media to flow before call data is read
    pub settle: Duration,
}

impl Default for ElementCallBasic {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
        }
    }
}

fn shows(data: &CallData, caption: &str) -> bool {
    data.video_tiles.iter().any(|tile| tile.caption == caption)
}

#[async_trait]
impl Scenario for ElementCallBasic {
    fn name(&self) -> &str {
        "element_call_basic"
    }

    fn definition(&self) -> TestDefinition {
        TestDefinition::new()
            .client("alice", [CapabilityType::ElementCall])
            .client("bob", [CapabilityType::ElementCall])
            .servers(ServerType::SynapseDevelop, &["server"])
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let alice = ctx.client("alice")?;
        let bob = ctx.client("bob")?;
        ctx.server("server")?;

        let call_name = format!("tl_chat_{}", Utc::now().timestamp_millis());
        let (alice_joined, bob_joined) = tokio::try_join!(
            alice.create_or_join(&call_name, "alice"),
            bob.create_or_join(&call_name, "bob")
        )?;
        info!("{} joined: alice {}, bob {}", call_name, alice_joined, bob_joined);

        tokio::try_join!(alice.lobby_join(), bob.lobby_join())?;
        tokio::time::sleep(self.settle).await;
        let (alice_data, bob_data) = tokio::try_join!(alice.get_call_data(), bob.get_call_data())?;

        for (viewer, data) in [("alice", &alice_data), ("bob", &bob_data)] {
            for caption in ["alice", "bob"] {
                ensure(
                    shows(data, caption),
                    format!("{} does not see a video tile for {}", viewer, caption),
                )?;
            }
            ensure(
                !data.video_tiles.iter().any(|tile| tile.muted),
                format!("{} sees a muted tile although nobody muted", viewer),
            )?;
        }
        Ok(())
    }
}
