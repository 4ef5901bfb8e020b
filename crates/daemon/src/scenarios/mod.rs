//! Built-in scenarios

mod element_call;
mod exit_immediately;
mod send_messages;
mod verify_client;

pub use element_call::ElementCallBasic;
pub use exit_immediately::ExitImmediately;
pub use send_messages::SendMessages;
pub use verify_client::VerifyClient;

use crate::scenario::Scenario;
use std::sync::Arc;

/// Every scenario shipped with the orchestrator
pub fn catalog() -> Vec<Arc<dyn Scenario>> {
    vec![
        Arc::new(SendMessages),
        Arc::new(VerifyClient),
        Arc::new(ElementCallBasic::default()),
        Arc::new(ExitImmediately::default()),
    ]
}
