use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{lock::Mutex, Future, FutureExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;

use geobus_common::{
    names, Error, Schema, Value, DBUS_INTERFACE, DBUS_SERVICE_NAME, NAME_OWNER_CHANGED_SIGNAL,
};

use crate::{
    subscription::{HandlerFn, MatchRule, SignalMessage, SubscriptionToken, Subscriptions},
    transport::{MethodCall, SignalStream, Transport},
    Proxy,
};

/// Bus instance to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusScope {
    Session,
    System,
    /// Explicit bus address, e.g. `unix:path=/run/user/1000/bus`
    Address(String),
}

struct Inner {
    transport: Arc<dyn Transport>,
    /// Interface descriptions to validate calls against
    schema: Mutex<Arc<Schema>>,
    subscriptions: Mutex<Subscriptions>,
    /// Owners of the well-known names used as subscription senders
    owners: Mutex<HashMap<String, Option<String>>>,
    /// Set once the bus reports name owner changes to this connection
    tracking_owners: AtomicBool,
    /// Incoming signals. Locked by the dispatch loop while it runs
    incoming: Mutex<SignalStream>,
    stop_token: CancellationToken,
}

/// Bus connection handle. Cheap to clone, all clones share the same transport and subscriptions
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect to a D-Bus bus
    #[cfg(feature = "dbus")]
    pub async fn connect(scope: BusScope) -> crate::Result<Self> {
        let transport = crate::transport::dbus::DbusTransport::connect(&scope).await?;
        let connection = Self::with_transport(Arc::new(transport))?;

        info!(
            "Connected to the {scope:?} bus as {}",
            connection.unique_name().unwrap_or_default()
        );

        Ok(connection)
    }

    #[cfg(not(feature = "dbus"))]
    pub async fn connect(scope: BusScope) -> crate::Result<Self> {
        Err(Error::Connection(format!(
            "Can't connect to the {scope:?} bus: built without D-Bus support"
        )))
    }

    /// Make a connection over an arbitrary transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> crate::Result<Self> {
        // Subscribe to incoming signals right away to queue signals arriving before [Self::run]
        let incoming = transport.signals()?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                schema: Mutex::new(Arc::new(Schema::default())),
                subscriptions: Mutex::new(Subscriptions::default()),
                owners: Mutex::new(HashMap::new()),
                tracking_owners: AtomicBool::new(false),
                incoming: Mutex::new(incoming),
                stop_token: CancellationToken::new(),
            }),
        })
    }

    /// Set interface descriptions. Calls to described interfaces are validated before sending
    pub async fn set_schema(&self, schema: Schema) {
        *self.inner.schema.lock().await = Arc::new(schema);
    }

    pub async fn schema(&self) -> Arc<Schema> {
        self.inner.schema.lock().await.clone()
    }

    pub fn unique_name(&self) -> Option<String> {
        self.inner.transport.unique_name()
    }

    /// Get a remote object handle. Doesn't make any calls.
    /// Service names starting with a dot are expanded: `.GeoClue2` is `org.freedesktop.GeoClue2`
    pub fn get(&self, service_name: &str, path: &str) -> crate::Result<Proxy> {
        let service_name = names::expand_service_name(service_name);
        names::check_object(&service_name, path)?;

        Ok(Proxy::new(self.clone(), service_name, path.to_owned()))
    }

    pub(crate) async fn call(&self, call: MethodCall) -> crate::Result<Vec<Value>> {
        debug!(
            "Calling {}.{} at {}{}",
            call.interface, call.member, call.destination, call.path
        );

        let result = self.inner.transport.call(call).await;

        if let Err(e) = &result {
            debug!("Call failed: {e}");
        }

        result
    }

    /// Subscribe to signals matching `rule`. A signal name can be used as a rule to
    /// match the signal from any sender.
    ///
    /// **Note**: You need to [Self::run] the connection to receive signals
    pub async fn subscribe<R, F, Fr>(
        &self,
        rule: R,
        mut handler: F,
    ) -> crate::Result<SubscriptionToken>
    where
        R: Into<MatchRule>,
        F: FnMut(SignalMessage) -> Fr + Send + 'static,
        Fr: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let rule = rule.into();
        if let Some(member) = &rule.member {
            if !names::is_valid_member_name(member) {
                return Err(Error::NotFound(format!("Invalid signal name '{member}'")));
            }
        }

        if let Some(sender) = rule.well_known_sender() {
            self.track_owner(sender).await?;
        }

        self.inner.transport.add_match(rule.clone()).await?;

        let handler: HandlerFn = Box::new(move |message| handler(message).boxed());
        let token = self
            .inner
            .subscriptions
            .lock()
            .await
            .insert(rule.clone(), handler);

        info!("Subscribed to {rule} with {token}");
        Ok(token)
    }

    /// Resolve the current owner of `name` and keep it up to date from `NameOwnerChanged`
    async fn track_owner(&self, name: &str) -> crate::Result<()> {
        if name == DBUS_SERVICE_NAME || self.inner.owners.lock().await.contains_key(name) {
            return Ok(());
        }

        if !self.inner.tracking_owners.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.inner.transport.add_match(name_owner_rule()).await {
                self.inner.tracking_owners.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let owner = self.inner.transport.name_owner(name).await?;
        debug!("{name} is owned by {owner:?}");

        // Another subscription may have resolved it meanwhile
        self.inner
            .owners
            .lock()
            .await
            .entry(name.to_owned())
            .or_insert(owner);

        Ok(())
    }

    /// Owner of a tracked well-known name
    pub async fn name_owner(&self, name: &str) -> Option<String> {
        self.inner.owners.lock().await.get(name).cloned().flatten()
    }

    /// Cancel a subscription. The handler is never called after this returns
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> crate::Result<()> {
        let rule = self
            .inner
            .subscriptions
            .lock()
            .await
            .remove(token)
            .ok_or_else(|| Error::NotFound(format!("No subscription {token}")))?;

        info!("Unsubscribed {token} from {rule}");
        self.inner.transport.remove_match(rule).await
    }

    /// Dispatch incoming signals to the subscribers until [Self::stop] is called.
    /// Returns an error if the bus connection drops.
    ///
    /// **Note**: Stopping is final. Subsequent calls return immediately
    pub async fn run(&self) -> crate::Result<()> {
        let mut incoming = self
            .inner
            .incoming
            .try_lock()
            .ok_or_else(|| Error::Connection("Dispatch loop is already running".into()))?;

        debug!("Entering dispatch loop");

        loop {
            tokio::select! {
                biased;

                _ = self.inner.stop_token.cancelled() => {
                    info!("Dispatch loop stopped");
                    return Ok(())
                }
                message = incoming.next() => {
                    match message {
                        Some(message) => self.dispatch(message).await,
                        None => {
                            warn!("Bus connection closed. Leaving dispatch loop");
                            return Err(Error::Connection("Bus connection closed".into()))
                        }
                    }
                }
            }
        }
    }

    /// Stop the dispatch loop. Can be called from a signal handler
    pub fn stop(&self) {
        self.inner.stop_token.cancel()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_token.is_cancelled()
    }

    /// Stop the dispatch loop, drop all subscriptions, and close the transport
    pub async fn shutdown(&self) {
        self.stop();

        let rules = self.inner.subscriptions.lock().await.clear();
        debug!("Dropped {} subscriptions", rules.len());

        self.inner.transport.close().await;
        info!("Connection shut down");
    }

    async fn update_owner(&self, message: &SignalMessage) {
        if message.sender != DBUS_SERVICE_NAME
            || message.interface != DBUS_INTERFACE
            || message.member != NAME_OWNER_CHANGED_SIGNAL
        {
            return;
        }

        let [Value::Str(name), Value::Str(_), Value::Str(new_owner)] = message.args.as_slice()
        else {
            warn!("Invalid {NAME_OWNER_CHANGED_SIGNAL} arguments '{}'", message.signature());
            return;
        };

        let mut owners = self.inner.owners.lock().await;
        if let Some(owner) = owners.get_mut(name) {
            debug!("{name} owner changed to '{new_owner}'");
            *owner = Some(new_owner.clone()).filter(|owner| !owner.is_empty());
        }
    }

    async fn dispatch(&self, message: SignalMessage) {
        self.update_owner(&message).await;

        let tokens = {
            let owners = self.inner.owners.lock().await;
            self.inner
                .subscriptions
                .lock()
                .await
                .matching(&message, |name| owners.get(name).cloned().flatten())
        };

        if tokens.is_empty() {
            trace!(
                "No subscribers for {}.{} from {}",
                message.interface,
                message.member,
                message.sender
            );
            return;
        }

        for token in tokens {
            // Unsubscribed by a previous handler
            let Some(mut handler) = self.inner.subscriptions.lock().await.take_handler(token)
            else {
                continue;
            };

            debug!(
                "Delivering {}.{} from {} to {token}",
                message.interface, message.member, message.sender
            );

            match panic::catch_unwind(AssertUnwindSafe(|| handler(message.clone()))) {
                Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Signal handler {token} failed: {e}"),
                    Err(_) => error!("Signal handler {token} panicked"),
                },
                Err(_) => error!("Signal handler {token} panicked"),
            }

            self.inner
                .subscriptions
                .lock()
                .await
                .restore(token, handler);
        }
    }

    /// Number of active subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().await.len()
    }
}

fn name_owner_rule() -> MatchRule {
    MatchRule::signal(NAME_OWNER_CHANGED_SIGNAL)
        .with_sender(DBUS_SERVICE_NAME)
        .with_interface(DBUS_INTERFACE)
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Connection: {}", self.unique_name().unwrap_or_default())
    }
}
