use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use futures::future::BoxFuture;

use geobus_common::Value;

/// Incoming signal emission
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique bus name of the emitter
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl SignalMessage {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn signature(&self) -> String {
        self.args.iter().map(Value::signature).collect()
    }
}

/// Signal filter. Empty fields match anything
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl MatchRule {
    /// Match a signal by name from any sender
    pub fn signal(member: &str) -> Self {
        Self {
            member: Some(member.to_owned()),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_owned());
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_owned());
        self
    }

    /// Check the message against path, interface, and member filters
    pub fn matches_members(&self, message: &SignalMessage) -> bool {
        fn field_matches(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |filter| filter == value)
        }

        field_matches(&self.path, &message.path)
            && field_matches(&self.interface, &message.interface)
            && field_matches(&self.member, &message.member)
    }

    /// Full check. Signals carry unique sender names, so a well-known sender filter
    /// matches if `owner` resolves it to the message sender
    pub fn matches<F>(&self, message: &SignalMessage, owner: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let sender_matches = match self.sender.as_deref() {
            None => true,
            Some(sender) if sender == message.sender => true,
            Some(sender) if sender.starts_with(':') => false,
            Some(sender) => owner(sender).as_deref() == Some(message.sender.as_str()),
        };

        sender_matches && self.matches_members(message)
    }

    /// Well-known sender name, which needs owner tracking
    pub(crate) fn well_known_sender(&self) -> Option<&str> {
        self.sender
            .as_deref()
            .filter(|sender| !sender.starts_with(':'))
    }
}

impl From<&str> for MatchRule {
    fn from(member: &str) -> Self {
        Self::signal(member)
    }
}

/// Bus match rule syntax
impl Display for MatchRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "type='signal'")?;

        for (key, value) in [
            ("sender", &self.sender),
            ("path", &self.path),
            ("interface", &self.interface),
            ("member", &self.member),
        ] {
            if let Some(value) = value {
                write!(f, ",{key}='{value}'")?;
            }
        }

        Ok(())
    }
}

/// Subscription handle to unsubscribe with [crate::Connection::unsubscribe]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl Display for SubscriptionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type HandlerFn =
    Box<dyn FnMut(SignalMessage) -> BoxFuture<'static, crate::Result<()>> + Send>;

struct Entry {
    rule: MatchRule,
    /// Taken out while the handler runs
    handler: Option<HandlerFn>,
}

/// Registered subscriptions. Tokens grow monotonically, so iteration order is registration order
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    entries: BTreeMap<SubscriptionToken, Entry>,
}

impl Subscriptions {
    pub fn insert(&mut self, rule: MatchRule, handler: HandlerFn) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_id);
        self.next_id += 1;

        self.entries.insert(
            token,
            Entry {
                rule,
                handler: Some(handler),
            },
        );

        token
    }

    pub fn remove(&mut self, token: SubscriptionToken) -> Option<MatchRule> {
        self.entries.remove(&token).map(|entry| entry.rule)
    }

    pub fn matching<F>(&self, message: &SignalMessage, owner: F) -> Vec<SubscriptionToken>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.rule.matches(message, &owner))
            .map(|(token, _)| *token)
            .collect()
    }

    pub fn take_handler(&mut self, token: SubscriptionToken) -> Option<HandlerFn> {
        self.entries
            .get_mut(&token)
            .and_then(|entry| entry.handler.take())
    }

    /// Put the handler back. Dropped if unsubscribed in the meantime
    pub fn restore(&mut self, token: SubscriptionToken, handler: HandlerFn) {
        if let Some(entry) = self.entries.get_mut(&token) {
            entry.handler = Some(handler)
        }
    }

    pub fn clear(&mut self) -> Vec<MatchRule> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| entry.rule)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
