use futures::{future::BoxFuture, stream::BoxStream};

use geobus_common::Value;

use crate::subscription::{MatchRule, SignalMessage};

#[cfg(feature = "dbus")]
pub mod dbus;

pub type SignalStream = BoxStream<'static, SignalMessage>;

/// Outgoing method call
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Self {
        Self {
            destination: destination.to_owned(),
            path: path.to_owned(),
            interface: interface.to_owned(),
            member: member.to_owned(),
            args,
        }
    }

    pub fn signature(&self) -> String {
        self.args.iter().map(Value::signature).collect()
    }
}

/// Bus transport. Implemented by the D-Bus backend and by [crate::local::LocalBus] peers
pub trait Transport: Send + Sync {
    /// Own unique bus name, if assigned
    fn unique_name(&self) -> Option<String>;

    /// Make a method call and wait for the reply
    fn call(&self, call: MethodCall) -> BoxFuture<'_, crate::Result<Vec<Value>>>;

    /// Ask the bus to route matching signals to this connection
    fn add_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>>;

    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>>;

    /// Unique name of the current owner of `name`. `None` if nobody owns it
    fn name_owner(&self, name: &str) -> BoxFuture<'_, crate::Result<Option<String>>>;

    /// Stream of incoming signals. Ends if the connection drops
    fn signals(&self) -> crate::Result<SignalStream>;

    fn close(&self) -> BoxFuture<'_, ()>;
}
