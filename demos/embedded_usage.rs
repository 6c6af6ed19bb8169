//! Minimal embedding example for floatlease-core
//!
//! This example demonstrates using floatlease-core as a library in a custom
//! application. The lease server is simulated in-process, so the example
//! runs without a network.

use async_trait::async_trait;
use floatlease_core::traits::{LeaseGrant, LeaseRequest, LeaseTransport};
use floatlease_core::{
    ClientConfig, LeaseClient, LeaseEventKind, LeaseHandle, MemoryLocationStore, Result, Scope,
    ServerLocation,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// Length of the simulated leases
const LEASE: Duration = Duration::from_secs(2);

/// In-process lease server
///
/// Upgrades the edition on the second renewal so the example shows a
/// FeaturesChanged notification.
struct EmbeddedServer {
    renewals: Arc<AtomicUsize>,
}

impl EmbeddedServer {
    fn grant(edition: &str) -> LeaseGrant {
        LeaseGrant::new(LEASE)
            .with_lease_id("embedded-1")
            .with_feature("edition", edition)
            .with_feature("max-streams", "4")
    }
}

#[async_trait]
impl LeaseTransport for EmbeddedServer {
    async fn request(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant> {
        println!("[Server] {} asks {} for a seat", request.handle_id, location);
        Ok(Self::grant("pro"))
    }

    async fn renew(
        &self,
        _location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant> {
        let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[Server] renewal #{} of {:?}", n, request.lease_id);
        Ok(Self::grant(if n >= 2 { "enterprise" } else { "pro" }))
    }

    async fn drop_lease(&self, _location: &ServerLocation, request: &LeaseRequest) -> Result<()> {
        println!("[Server] seat {:?} released", request.lease_id);
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "embedded"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Embedded floatlease-core Example ===\n");

    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = Box::new(EmbeddedServer {
        renewals: renewals.clone(),
    });
    let store = Box::new(MemoryLocationStore::new());
    let handle = LeaseHandle::new("embedded-handle", "embedded-product", "embedded-fingerprint");

    println!("1. Creating client...");
    let (client, events) = LeaseClient::new(ClientConfig::new(), handle, transport, store)?;

    let event_listener = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            println!("[Event] {:?}", event);
        }
        println!("Event listener stopped");
    });

    client.save_server("embedded.local", 13, Scope::User).await?;
    client.set_callback(|kind: LeaseEventKind| {
        println!("[Callback] {:?} (code {:#x})", kind, kind.code());
    })?;

    println!("2. Requesting lease...");
    client.request_lease().await?;
    println!(
        "   edition = {}, max-streams = {}",
        client.get_feature_value("edition")?,
        client.get_feature_value("max-streams")?
    );

    println!("\n3. Holding the lease while the dispatcher renews it...\n");
    tokio::time::sleep(Duration::from_millis(3500)).await;
    println!(
        "\n   edition = {} after {} renewal(s)",
        client.get_feature_value("edition")?,
        renewals.load(Ordering::SeqCst)
    );

    println!("\n4. Dropping lease and shutting down...");
    client.drop_lease().await?;
    client.shutdown().await?;
    drop(client);

    let _ = tokio::time::timeout(Duration::from_millis(100), event_listener).await;

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- Renewal runs on the client's own dispatcher task");
    println!("- Callbacks and the event channel see the same notifications");
    println!("- No renewal or callback happens after drop returns");

    Ok(())
}
