//! Lease client
//!
//! The single entry point for one product handle. It coordinates the server
//! location store, the transport, the state machine and the notification
//! dispatcher.
//!
//! ## Lifecycle
//!
//! 1. Create with [`LeaseClient::new()`], keep the event receiver
//! 2. Save the server location once with [`LeaseClient::save_server()`]
//! 3. Optionally register a callback
//! 4. [`LeaseClient::request_lease()`] starts renewing in the background
//! 5. [`LeaseClient::drop_lease()`] releases the seat
//! 6. [`LeaseClient::shutdown()`] stops everything
//!
//! Dropping the client without calling `shutdown` stops the renewal task but
//! does not release the seat; the server reclaims it when the lease lapses.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dates::{DateCheck, parse_date};
use crate::dispatcher::{
    CallbackRegistration, CallbackSlot, ClientEvent, DispatchContext, EventSink,
    NotificationDispatcher,
};
use crate::error::{Error, Result};
use crate::lease::{
    FeatureMap, Lease, LeaseEventKind, LeaseHandle, LeaseState, Scope, ServerLocation,
};
use crate::machine::{LeaseStateMachine, LeaseTarget};
use crate::traits::{LeaseGrant, LeaseRequest, LeaseTransport, ServerLocationStore};

/// Floating-license lease client
pub struct LeaseClient {
    config: ClientConfig,
    handle: LeaseHandle,
    store: Box<dyn ServerLocationStore>,
    context: DispatchContext,
    dispatcher: Mutex<Option<NotificationDispatcher>>,
}

impl LeaseClient {
    /// Create a new lease client
    ///
    /// # Parameters
    ///
    /// - `config`: Client configuration (validated here)
    /// - `handle`: Handle resolved for the product and this installation
    /// - `transport`: Lease server transport
    /// - `store`: Server location store
    ///
    /// # Returns
    ///
    /// A tuple of (client, event_receiver) where event_receiver yields client events
    pub fn new(
        config: ClientConfig,
        handle: LeaseHandle,
        transport: Box<dyn LeaseTransport>,
        store: Box<dyn ServerLocationStore>,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.event_channel_capacity);
        let context = DispatchContext {
            machine: Arc::new(LeaseStateMachine::new(config.renewal_policy())),
            transport: Arc::from(transport),
            request: LeaseRequest::for_handle(&handle),
            callback: Arc::new(CallbackSlot::default()),
            events,
            request_timeout: config.request_timeout(),
        };

        debug!(
            "Lease client created for product {} using {} transport and {} store",
            handle.product_guid(),
            context.transport.transport_name(),
            store.store_name()
        );

        let client = Self {
            config,
            handle,
            store,
            context,
            dispatcher: Mutex::new(None),
        };

        Ok((client, rx))
    }

    /// Save the lease server location
    ///
    /// An empty `host` provisions the scope without a location. Done from an
    /// elevated process for [`Scope::System`], this lets unprivileged processes
    /// save the system location later.
    pub async fn save_server(&self, host: &str, port: u16, scope: Scope) -> Result<()> {
        self.context.machine.ensure_open()?;

        let host = host.trim();
        if host.is_empty() {
            info!("Provisioning {} server location record", scope);
            return self.store.provision(scope).await;
        }
        if port == 0 {
            return Err(Error::config("server port must be > 0"));
        }

        let location = ServerLocation::new(host, port, scope);
        self.store.save(&location).await?;
        info!("Saved server location {}", location);
        Ok(())
    }

    /// The saved server location
    ///
    /// The configured scope is consulted first, then the other one.
    pub async fn get_server(&self) -> Result<ServerLocation> {
        self.context.machine.ensure_open()?;

        let preferred = self.config.scope;
        for scope in [preferred, preferred.other()] {
            if let Some(location) = self.store.load(scope).await? {
                return Ok(location);
            }
        }
        Err(Error::NoServer)
    }

    /// Register the notification callback
    ///
    /// Fails with [`Error::LeaseExists`] while a lease is pending or held.
    pub fn set_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(LeaseEventKind) + Send + Sync + 'static,
    {
        self.register(CallbackRegistration::new(callback))
    }

    /// Register a notification callback that receives `context` with every call
    ///
    /// Fails with [`Error::LeaseExists`] while a lease is pending or held.
    pub fn set_callback_with_context<F, C>(&self, callback: F, context: C) -> Result<()>
    where
        F: Fn(LeaseEventKind, &C) + Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        self.register(CallbackRegistration::with_context(callback, context))
    }

    fn register(&self, registration: CallbackRegistration) -> Result<()> {
        let callback = &self.context.callback;
        self.context.machine.while_idle(|| callback.set(registration))?;
        debug!("Lease callback registered");
        Ok(())
    }

    /// Request a lease from the saved server
    ///
    /// Blocks until the server answers or the request times out. On success
    /// the lease is `Active` and renewed in the background. On failure the
    /// state returns to `None` and the error is returned.
    pub async fn request_lease(&self) -> Result<()> {
        let machine = &self.context.machine;
        machine.ensure_open()?;
        if self.config.require_callback && !self.context.callback.is_set() {
            return Err(Error::NoCallback);
        }

        let generation = machine.begin_request()?;

        let (location, grant) = match self.fetch_grant().await {
            Ok(fetched) => fetched,
            Err(e) => {
                machine.abort_request(generation);
                warn!("Lease request failed: {}", e);
                return Err(e);
            }
        };

        let granted = LeaseTarget {
            location: location.clone(),
            lease_id: grant.lease_id.clone(),
        };
        let terms = match machine.apply_grant(generation, location, grant) {
            Ok(terms) => terms,
            Err(e) => {
                // The server handed out a seat nobody will renew
                machine.abort_request(generation);
                warn!("Discarding lease grant: {}", e);
                if let Err(release_err) = self.release(&granted).await {
                    debug!("Could not release discarded lease: {}", release_err);
                }
                return Err(e);
            }
        };
        self.context.events.emit(ClientEvent::LeaseGranted {
            lease_id: granted.lease_id,
            expires_at: terms.expires_at,
        });

        let mut slot = self.dispatcher.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(NotificationDispatcher::spawn(
            self.context.clone(),
            generation,
            terms,
        ));
        Ok(())
    }

    /// Ask the server for a grant and check it against the local clock
    async fn fetch_grant(&self) -> Result<(ServerLocation, LeaseGrant)> {
        let location = self.get_server().await?;
        debug!("Requesting lease from {}", location);

        let request = &self.context.request;
        let grant = tokio::time::timeout(
            self.config.request_timeout(),
            self.context.transport.request(&location, request),
        )
        .await
        .unwrap_or(Err(Error::ConnectionTimeout))?;

        if let Some(server_time) = grant.server_time {
            let skew = (Utc::now() - server_time).abs();
            if skew > self.config.max_clock_skew() {
                warn!(
                    "Local clock differs from server time by {}s, refusing lease",
                    skew.num_seconds()
                );
                let target = LeaseTarget {
                    location,
                    lease_id: grant.lease_id,
                };
                if let Err(e) = self.release(&target).await {
                    debug!("Could not release refused lease: {}", e);
                }
                return Err(Error::WrongTime);
            }
        }

        Ok((location, grant))
    }

    /// Release the held lease
    ///
    /// No callback fires. Waits for the server to acknowledge; if it cannot
    /// be reached the lease is still `Dropped` locally and the server reclaims
    /// the seat on its own. A terminal denial from the server is returned
    /// after the local drop.
    pub async fn drop_lease(&self) -> Result<()> {
        let target = self.context.machine.begin_drop();
        self.stop_dispatcher().await;
        let target = target?;

        let result = match self.release(&target).await {
            Err(e) if e.is_transient() => {
                warn!("Server did not acknowledge lease drop: {}", e);
                Ok(())
            }
            other => other,
        };

        self.context.events.emit(ClientEvent::LeaseDropped);
        result
    }

    async fn release(&self, target: &LeaseTarget) -> Result<()> {
        let request = self
            .context
            .request
            .clone()
            .with_lease_id(target.lease_id.clone());

        tokio::time::timeout(
            self.config.request_timeout(),
            self.context.transport.drop_lease(&target.location, &request),
        )
        .await
        .unwrap_or(Err(Error::ConnectionTimeout))
    }

    async fn stop_dispatcher(&self) {
        let previous = self.dispatcher.lock().await.take();
        if let Some(dispatcher) = previous {
            dispatcher.stop().await;
        }
    }

    /// Stop renewing, release any held lease and close the client
    ///
    /// Every later call fails with [`Error::InvalidHandle`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.context.machine.ensure_open().is_err() {
            return Ok(());
        }

        let target = self.context.machine.close();
        self.stop_dispatcher().await;

        if let Some(target) = target {
            if let Err(e) = self.release(&target).await {
                warn!("Failed to release lease during shutdown: {}", e);
            }
            self.context.events.emit(ClientEvent::LeaseDropped);
        }

        info!("Lease client for product {} shut down", self.handle.product_guid());
        Ok(())
    }

    /// Whether a lease is currently held
    pub fn has_lease(&self) -> bool {
        self.context.machine.state().is_held()
    }

    /// Current lease state
    pub fn lease_state(&self) -> LeaseState {
        self.context.machine.state()
    }

    /// Point-in-time view of the lease
    pub fn lease(&self) -> Lease {
        self.context.machine.snapshot()
    }

    /// Snapshot of the current feature set
    pub fn features(&self) -> Arc<FeatureMap> {
        self.context.machine.features().snapshot()
    }

    /// Whether a feature has a non-empty value
    pub fn has_feature(&self, name: &str) -> Result<bool> {
        self.context.machine.ensure_open()?;
        Ok(self.context.machine.features().has(name))
    }

    /// Value of a feature, empty if absent
    pub fn get_feature_value(&self, name: &str) -> Result<String> {
        self.context.machine.ensure_open()?;
        Ok(self.context.machine.features().get(name))
    }

    /// Copy a feature value into `buf` as a NUL-terminated string
    ///
    /// Call with an empty buffer to learn the required size.
    pub fn feature_value_into(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        self.context.machine.ensure_open()?;
        self.context.machine.features().read_into(name, buf)
    }

    /// Check a date against the local clock
    ///
    /// Returns `false` for dates that cannot be parsed, and for every date
    /// while the local clock is behind the last server time by more than the
    /// tolerated skew.
    pub fn is_date_valid(&self, date: &str, check: DateCheck) -> Result<bool> {
        self.context.machine.ensure_open()?;

        let Some(parsed) = parse_date(date) else {
            debug!("Unparseable date {:?}", date);
            return Ok(false);
        };

        let now = Utc::now();
        let earliest_plausible = self
            .context
            .machine
            .last_server_time()
            .and_then(|t| t.checked_sub_signed(self.config.max_clock_skew()));
        if earliest_plausible.is_some_and(|earliest| now < earliest) {
            warn!("Local clock is behind the last server time");
            return Ok(false);
        }

        Ok(check.holds(parsed, now))
    }

    /// The handle this client was created for
    pub fn handle(&self) -> &LeaseHandle {
        &self.handle
    }

    /// The configuration this client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
