//! Test doubles and common utilities for lease client contract tests
//!
//! The doubles are scripted: each call pops the next queued reply or falls
//! back to a default, and every call is counted so tests can assert how often
//! the client talked to the server.

#![allow(dead_code)]

use floatlease_core::error::{Error, Result};
use floatlease_core::traits::{LeaseGrant, LeaseRequest, LeaseTransport};
use floatlease_core::{
    ClientConfig, ClientEvent, LeaseClient, LeaseEventKind, LeaseHandle, MemoryLocationStore,
    Scope, ServerLocation, ServerLocationStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SERVER_HOST: &str = "lease.example.com";
pub const SERVER_PORT: u16 = 8080;
pub const LEASE_SECS: u64 = 300;

/// What the scripted server answers
#[derive(Debug, Clone)]
pub enum Reply {
    /// Grant (or acknowledge, for drops)
    Grant(LeaseGrant),
    /// Deny with a library return code
    Deny(u32),
    /// Connection refused
    Unreachable,
    /// Never answer
    Hang,
    /// Grant after a delay
    Delayed(Duration, LeaseGrant),
}

impl Reply {
    async fn resolve(self) -> Result<LeaseGrant> {
        match self {
            Reply::Grant(grant) => Ok(grant),
            Reply::Deny(code) => Err(Error::from_code(code).unwrap_or(Error::Unknown(code))),
            Reply::Unreachable => Err(Error::connection("connection refused")),
            Reply::Hang => std::future::pending().await,
            Reply::Delayed(delay, grant) => {
                tokio::time::sleep(delay).await;
                Ok(grant)
            }
        }
    }
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<Reply>,
    fallback: Reply,
}

impl Script {
    fn new(fallback: Reply) -> Self {
        Self {
            queued: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Reply {
        self.queued
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// A LeaseTransport that answers from a script and counts calls
pub struct ScriptedTransport {
    request_script: Arc<Mutex<Script>>,
    renew_script: Arc<Mutex<Script>>,
    drop_script: Arc<Mutex<Script>>,
    request_call_count: Arc<AtomicUsize>,
    renew_call_count: Arc<AtomicUsize>,
    drop_call_count: Arc<AtomicUsize>,
    locations: Arc<Mutex<Vec<ServerLocation>>>,
    requests: Arc<Mutex<Vec<LeaseRequest>>>,
}

impl ScriptedTransport {
    /// A transport that grants `grant` for every request and renewal
    pub fn granting(grant: LeaseGrant) -> Self {
        Self {
            request_script: Arc::new(Mutex::new(Script::new(Reply::Grant(grant.clone())))),
            renew_script: Arc::new(Mutex::new(Script::new(Reply::Grant(grant.clone())))),
            drop_script: Arc::new(Mutex::new(Script::new(Reply::Grant(grant)))),
            request_call_count: Arc::new(AtomicUsize::new(0)),
            renew_call_count: Arc::new(AtomicUsize::new(0)),
            drop_call_count: Arc::new(AtomicUsize::new(0)),
            locations: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a transport that shares script and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            request_script: Arc::clone(&other.request_script),
            renew_script: Arc::clone(&other.renew_script),
            drop_script: Arc::clone(&other.drop_script),
            request_call_count: Arc::clone(&other.request_call_count),
            renew_call_count: Arc::clone(&other.renew_call_count),
            drop_call_count: Arc::clone(&other.drop_call_count),
            locations: Arc::clone(&other.locations),
            requests: Arc::clone(&other.requests),
        }
    }

    /// Queue a reply for the next request call
    pub fn push_request(&self, reply: Reply) {
        self.request_script.lock().unwrap().queued.push_back(reply);
    }

    /// Queue a reply for the next renew call
    pub fn push_renew(&self, reply: Reply) {
        self.renew_script.lock().unwrap().queued.push_back(reply);
    }

    /// Answer every renewal not queued explicitly with `reply`
    pub fn renew_by_default(&self, reply: Reply) {
        self.renew_script.lock().unwrap().fallback = reply;
    }

    /// Answer every drop with `reply`
    pub fn drop_by_default(&self, reply: Reply) {
        self.drop_script.lock().unwrap().fallback = reply;
    }

    pub fn request_call_count(&self) -> usize {
        self.request_call_count.load(Ordering::SeqCst)
    }

    pub fn renew_call_count(&self) -> usize {
        self.renew_call_count.load(Ordering::SeqCst)
    }

    pub fn drop_call_count(&self) -> usize {
        self.drop_call_count.load(Ordering::SeqCst)
    }

    /// Every location the client sent a call to, in order
    pub fn locations(&self) -> Vec<ServerLocation> {
        self.locations.lock().unwrap().clone()
    }

    /// Every request body the client sent, in order
    pub fn requests(&self) -> Vec<LeaseRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, location: &ServerLocation, request: &LeaseRequest) {
        self.locations.lock().unwrap().push(location.clone());
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[async_trait::async_trait]
impl LeaseTransport for ScriptedTransport {
    async fn request(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant> {
        self.request_call_count.fetch_add(1, Ordering::SeqCst);
        self.record(location, request);
        let reply = self.request_script.lock().unwrap().next();
        reply.resolve().await
    }

    async fn renew(&self, location: &ServerLocation, request: &LeaseRequest) -> Result<LeaseGrant> {
        self.renew_call_count.fetch_add(1, Ordering::SeqCst);
        self.record(location, request);
        let reply = self.renew_script.lock().unwrap().next();
        reply.resolve().await
    }

    async fn drop_lease(&self, location: &ServerLocation, request: &LeaseRequest) -> Result<()> {
        self.drop_call_count.fetch_add(1, Ordering::SeqCst);
        self.record(location, request);
        let reply = self.drop_script.lock().unwrap().next();
        reply.resolve().await.map(|_| ())
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// Records every notification delivered to a callback
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    events: Arc<Mutex<Vec<LeaseEventKind>>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records into this recorder
    pub fn callback(&self) -> impl Fn(LeaseEventKind) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |kind| events.lock().unwrap().push(kind)
    }

    pub fn events(&self) -> Vec<LeaseEventKind> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: LeaseEventKind) -> usize {
        self.events().iter().filter(|k| **k == kind).count()
    }
}

/// A 300-second grant with the given features
pub fn grant(features: &[(&str, &str)]) -> LeaseGrant {
    let mut grant = LeaseGrant::new(Duration::from_secs(LEASE_SECS)).with_lease_id("lease-1");
    for (name, value) in features {
        grant = grant.with_feature(*name, *value);
    }
    grant
}

/// Configuration used by most contract tests
pub fn minimal_config() -> ClientConfig {
    ClientConfig::new()
}

pub fn test_handle() -> LeaseHandle {
    LeaseHandle::new("handle-1", "9a7b4c1e-1f2d-4e0a-9d1c-5b6e7f8a9b0c", "fp-test")
}

/// A memory store with the test server saved in the user scope
pub async fn store_with_server() -> MemoryLocationStore {
    let store = MemoryLocationStore::new();
    store
        .save(&ServerLocation::new(SERVER_HOST, SERVER_PORT, Scope::User))
        .await
        .unwrap();
    store
}

/// A client wired to a transport sharing counters with `transport`
pub fn client_with(
    config: ClientConfig,
    transport: &ScriptedTransport,
    store: MemoryLocationStore,
) -> (LeaseClient, mpsc::Receiver<ClientEvent>) {
    LeaseClient::new(
        config,
        test_handle(),
        Box::new(ScriptedTransport::sharing_counters_with(transport)),
        Box::new(store),
    )
    .unwrap()
}

/// Everything currently buffered on the event channel
pub fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
