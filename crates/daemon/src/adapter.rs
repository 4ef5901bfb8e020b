//! Adapters and the adapter registry
//!
//! An [`Adapter`] is the server-side proxy of one remote automation process.
//! It starts unbound (answering polls with `idle`), is bound to exactly one
//! [`Client`] when a test case claims it, and ends completed (answering polls
//! with `exit`). It never returns to unbound.
//!
//! Every registry operation takes the lock once and never awaits while
//! holding it, so each check-then-act sequence is atomic.

use crate::allocator::{self, ClientSlot};
use crate::client::{Client, FileIndex};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trafficlight_common::{ActionResponse, CapabilityDescriptor, CapabilityType, Error, PollAction, Result};

/// Re-poll hint handed to adapters no test case has claimed yet
pub const UNBOUND_IDLE_DELAY_MS: u64 = 30_000;

/// Exit reason given to a poll from a handle the registry has no record of
pub const UNKNOWN_ADAPTER_REASON: &str = "no record of this adapter";

/// Server-side proxy for one remote client
#[derive(Debug)]
pub struct Adapter {
    handle: String,
    registration: CapabilityDescriptor,
    registered_at: DateTime<Utc>,
    bound_at: Option<DateTime<Utc>>,
    last_polled: Option<DateTime<Utc>>,
    last_responded: Option<DateTime<Utc>>,
    completed: bool,
    last_error: Option<String>,
    client: Option<Client>,
}

impl Adapter {
    pub fn new(handle: impl Into<String>, registration: CapabilityDescriptor) -> Self {
        Self::registered_at(handle, registration, Utc::now())
    }

    fn registered_at(handle: impl Into<String>, registration: CapabilityDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            handle: handle.into(),
            registration,
            registered_at: now,
            bound_at: None,
            last_polled: None,
            last_responded: None,
            completed: false,
            last_error: None,
            client: None,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn satisfies(&self, capability: CapabilityType) -> bool {
        capability.matches(&self.registration)
    }

    /// Unbound and not completed: free for a test case to claim
    pub fn is_available(&self) -> bool {
        self.client.is_none() && !self.completed
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    fn last_poll_or_registration(&self) -> DateTime<Utc> {
        self.last_polled.unwrap_or(self.registered_at)
    }

    fn last_response_or_binding(&self) -> DateTime<Utc> {
        self.last_responded
            .or(self.bound_at)
            .unwrap_or(self.registered_at)
    }

    fn bind(&mut self, client: Client, now: DateTime<Utc>) {
        info!("Allocate adapter {} to {}", self.handle, client.name());
        self.client = Some(client);
        self.bound_at = Some(now);
    }

    /// Mark finished; every later poll answers `exit`
    pub fn finish(&mut self) {
        self.completed = true;
    }

    pub fn poll(&mut self, now: DateTime<Utc>) -> PollAction {
        let action = if self.completed {
            let reason = self
                .last_error
                .clone()
                .unwrap_or_else(|| "test case finished".to_string());
            PollAction::exit(reason)
        } else {
            match &self.client {
                None => PollAction::idle(UNBOUND_IDLE_DELAY_MS),
                Some(client) => client.poll_data(),
            }
        };
        self.last_polled = Some(now);
        action
    }

    pub fn respond(&mut self, response: ActionResponse, now: DateTime<Utc>) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::AdapterNotBound(self.handle.clone()))?;
        client.give_response(response)?;
        self.last_responded = Some(now);
        Ok(())
    }

    /// Mark completed and route `error` to the bound client.
    ///
    /// Returns false when there was no client to deliver to.
    pub fn fail(&mut self, error: Error, now: Option<DateTime<Utc>>) -> bool {
        self.completed = true;
        self.last_error = Some(error.to_string());
        info!("{} had an error: {}", self.handle, error);

        let Some(client) = &self.client else {
            info!("Adapter {} has not been assigned a client yet. Dropping error", self.handle);
            return false;
        };
        if let Some(now) = now {
            self.last_responded = Some(now);
        }
        client.give_error(error);
        true
    }

    pub fn info(&self) -> AdapterInfo {
        AdapterInfo {
            handle: self.handle.clone(),
            registration: self.registration.clone(),
            registered_at: self.registered_at,
            last_polled: self.last_polled,
            last_responded: self.last_responded,
            completed: self.completed,
            role: self.client.as_ref().map(|c| c.name().to_string()),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of an adapter for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct AdapterInfo {
    pub handle: String,
    pub registration: CapabilityDescriptor,
    pub registered_at: DateTime<Utc>,
    pub last_polled: Option<DateTime<Utc>>,
    pub last_responded: Option<DateTime<Utc>>,
    pub completed: bool,
    pub role: Option<String>,
    pub last_error: Option<String>,
}

/// Outcome of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Handle already known and still unbound; nothing changed
    Repeated,
}

/// In-memory store of every registered adapter, in registration order
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<Mutex<Vec<Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.adapters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.lock().is_empty()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.adapters.lock().iter().any(|a| a.handle == handle)
    }

    pub fn get(&self, handle: &str) -> Option<AdapterInfo> {
        self.adapters
            .lock()
            .iter()
            .find(|a| a.handle == handle)
            .map(Adapter::info)
    }

    pub fn list(&self) -> Vec<AdapterInfo> {
        self.adapters.lock().iter().map(Adapter::info).collect()
    }

    /// Register `handle`, or accept a repeat registration while it is unbound.
    pub fn register(&self, handle: &str, registration: CapabilityDescriptor) -> Result<Registration> {
        self.register_at(handle, registration, Utc::now())
    }

    pub fn register_at(
        &self,
        handle: &str,
        registration: CapabilityDescriptor,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        let mut adapters = self.adapters.lock();
        if let Some(existing) = adapters.iter().find(|a| a.handle == handle) {
            if existing.is_bound() {
                warn!("Adapter {} tried to re-register while in use", handle);
                return Err(Error::AdapterInUse(handle.to_string()));
            }
            info!("Adapter {} re-registered, returning OK again", handle);
            return Ok(Registration::Repeated);
        }

        info!("{} registered: {:?}", handle, registration);
        adapters.push(Adapter::registered_at(handle, registration, now));
        Ok(Registration::Created)
    }

    /// Next action for `handle`; unknown handles are told to exit and restart.
    pub fn poll(&self, handle: &str) -> PollAction {
        self.poll_at(handle, Utc::now())
    }

    pub fn poll_at(&self, handle: &str, now: DateTime<Utc>) -> PollAction {
        let mut adapters = self.adapters.lock();
        let action = match adapters.iter_mut().find(|a| a.handle == handle) {
            Some(adapter) => adapter.poll(now),
            None => PollAction::exit(UNKNOWN_ADAPTER_REASON),
        };
        debug!("Returning {} to {}", action, handle);
        action
    }

    pub fn respond(&self, handle: &str, response: ActionResponse) -> Result<()> {
        self.respond_at(handle, response, Utc::now())
    }

    pub fn respond_at(&self, handle: &str, response: ActionResponse, now: DateTime<Utc>) -> Result<()> {
        let mut adapters = self.adapters.lock();
        let adapter = adapters
            .iter_mut()
            .find(|a| a.handle == handle)
            .ok_or_else(|| Error::UnknownAdapter(handle.to_string()))?;
        debug!("{} responded: {}", handle, response.response);
        adapter.respond(response, now)
    }

    /// Deliver a remote failure to the bound client and complete the adapter.
    pub fn report_error(&self, handle: &str, error: Error) -> Result<()> {
        let mut adapters = self.adapters.lock();
        let adapter = adapters
            .iter_mut()
            .find(|a| a.handle == handle)
            .ok_or_else(|| Error::UnknownAdapter(handle.to_string()))?;
        if adapter.fail(error, Some(Utc::now())) {
            Ok(())
        } else {
            Err(Error::AdapterNotBound(handle.to_string()))
        }
    }

    /// Client bound to `handle`, for traffic that bypasses the exchange
    pub fn bound_client(&self, handle: &str) -> Result<Client> {
        let adapters = self.adapters.lock();
        let adapter = adapters
            .iter()
            .find(|a| a.handle == handle)
            .ok_or_else(|| Error::UnknownAdapter(handle.to_string()))?;
        adapter
            .client
            .clone()
            .ok_or_else(|| Error::AdapterNotBound(handle.to_string()))
    }

    /// Count an upload as a sign of life from `handle`
    pub fn touch_response(&self, handle: &str) {
        if let Some(adapter) = self.adapters.lock().iter_mut().find(|a| a.handle == handle) {
            adapter.last_responded = Some(Utc::now());
        }
    }

    /// Find adapters for `slots` and bind each to a fresh client, atomically.
    ///
    /// `begin` runs under the registry lock once a match exists; returning
    /// false abandons the claim with nothing bound.
    pub fn claim(
        &self,
        slots: &[ClientSlot],
        files: &FileIndex,
        begin: impl FnOnce() -> bool,
    ) -> Option<Vec<Client>> {
        let now = Utc::now();
        let mut adapters = self.adapters.lock();
        let allocations = {
            let available: Vec<&Adapter> = adapters.iter().filter(|a| a.is_available()).collect();
            allocator::allocate(slots, &available)?
        };
        if !begin() {
            return None;
        }

        let mut clients = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            if let Some(adapter) = adapters.iter_mut().find(|a| a.handle == allocation.adapter) {
                let client = Client::new(
                    allocation.role.clone(),
                    adapter.handle.clone(),
                    files.clone(),
                );
                adapter.bind(client.clone(), now);
                clients.push(client);
            }
        }
        Some(clients)
    }

    /// Mark the given adapters completed
    pub fn complete(&self, handles: &[String]) {
        let mut adapters = self.adapters.lock();
        for adapter in adapters.iter_mut().filter(|a| handles.contains(&a.handle)) {
            adapter.finish();
        }
    }

    /// Remove unbound adapters that have not polled within `threshold`.
    ///
    /// This includes adapters that failed before allocation; once removed they
    /// are answered `exit` as unknown handles. Bound adapters are kept.
    pub fn reap_idle(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let mut removed = Vec::new();
        self.adapters.lock().retain(|adapter| {
            let last_polled = adapter.last_poll_or_registration();
            let idle = !adapter.is_bound() && now - last_polled > threshold;
            if idle {
                warn!(
                    "Removing adapter {} due to not polling since {} (more than {}s)",
                    adapter.handle,
                    last_polled,
                    threshold.num_seconds()
                );
                removed.push(adapter.handle.clone());
            }
            !idle
        });
        removed
    }

    /// Fail bound adapters that have neither polled nor responded within `threshold`.
    pub fn time_out_active(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let mut timed_out = Vec::new();
        let mut adapters = self.adapters.lock();
        for adapter in adapters.iter_mut() {
            if !adapter.is_bound() || adapter.completed {
                continue;
            }
            let last_polled = adapter.last_poll_or_registration();
            let last_responded = adapter.last_response_or_binding();
            if now - last_polled > threshold && now - last_responded > threshold {
                warn!(
                    "Raising error for adapter {} due to not responding since {}, and not polling since {} (both more than {}s)",
                    adapter.handle,
                    last_responded,
                    last_polled,
                    threshold.num_seconds()
                );
                adapter.fail(
                    Error::PollTimeout {
                        seconds: threshold.num_seconds().max(0) as u64,
                    },
                    None,
                );
                timed_out.push(adapter.handle.clone());
            }
        }
        timed_out
    }

    /// Fail every adapter, e.g. on shutdown
    pub fn fail_all(&self, error: impl Fn() -> Error) {
        let mut adapters = self.adapters.lock();
        for adapter in adapters.iter_mut().filter(|a| !a.completed) {
            adapter.fail(error(), None);
        }
    }
}
