//! Scenarios: the scripts test cases run
//!
//! A scenario declares which roles it needs (each with a list of acceptable
//! client types) and which servers, then drives its clients with ordinary
//! sequential code. Concurrent steps are expressed with `tokio::try_join!`.

use crate::allocator::ClientSlot;
use crate::client::Client;
use crate::homerunner::HomeServer;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use trafficlight_common::{CapabilityType, Error, Result, ServerType};

/// A role and the client types it may be filled by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDefinition {
    pub role: String,
    pub candidates: Vec<CapabilityType>,
}

/// What a scenario needs before it can run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestDefinition {
    pub slots: Vec<SlotDefinition>,
    pub server_type: ServerType,
    pub server_names: Vec<String>,
}

impl TestDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role that any of `candidates` can fill
    pub fn client(mut self, role: &str, candidates: impl IntoIterator<Item = CapabilityType>) -> Self {
        self.slots.push(SlotDefinition {
            role: role.to_string(),
            candidates: candidates.into_iter().collect(),
        });
        self
    }

    pub fn network_proxy(self, role: &str) -> Self {
        self.client(role, [CapabilityType::NetworkProxy])
    }

    /// Servers to provision, bound to `names` in order
    pub fn servers(mut self, server_type: ServerType, names: &[&str]) -> Self {
        self.server_type = server_type;
        self.server_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Every assignment of one candidate type per slot, in slot order
    pub fn combinations(&self) -> Vec<Vec<ClientSlot>> {
        self.slots.iter().fold(vec![Vec::new()], |partials, slot| {
            partials
                .iter()
                .flat_map(|partial| {
                    slot.candidates.iter().map(move |&capability| {
                        let mut next = partial.clone();
                        next.push(ClientSlot::new(slot.role.clone(), capability));
                        next
                    })
                })
                .collect()
        })
    }
}

/// A named test script
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> TestDefinition;

    async fn run(&self, ctx: &ScenarioContext) -> Result<()>;
}

/// Clients and servers handed to a running scenario
#[derive(Debug, Default)]
pub struct ScenarioContext {
    clients: BTreeMap<String, Client>,
    servers: BTreeMap<String, HomeServer>,
}

impl ScenarioContext {
    pub fn new(clients: Vec<Client>, servers: Vec<(String, HomeServer)>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.name().to_string(), c))
                .collect(),
            servers: servers.into_iter().collect(),
        }
    }

    pub fn client(&self, role: &str) -> Result<Client> {
        self.clients.get(role).cloned().ok_or_else(|| {
            Error::InvalidConfig(format!("scenario has no client named {}", role))
        })
    }

    pub fn server(&self, name: &str) -> Result<HomeServer> {
        self.servers.get(name).cloned().ok_or_else(|| {
            Error::InvalidConfig(format!("scenario has no server named {}", name))
        })
    }
}

/// Fail the scenario with `msg` unless `condition` holds
pub fn ensure(condition: bool, msg: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::AssertionFailed(msg.into()))
    }
}

/// Fail the scenario unless `left == right`
pub fn ensure_eq<T: PartialEq + Debug>(left: T, right: T, msg: &str) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(Error::AssertionFailed(format!("{:?} is not {:?} {}", left, right, msg)))
    }
}
