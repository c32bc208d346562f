//! Transport contract
//!
//! The binding layer never talks to a socket itself. Everything it needs
//! from the bus (sending, reply correlation, signal subscriptions, object
//! registration and the event loop's idle queue) goes through [`Transport`];
//! [`Connection`] is the cheap, cloneable handle the rest of the crate uses.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::introspect::InterfaceInfo;
use crate::message::{Message, MessageType};
use crate::value::Value;

/// Well-known name of the message bus itself
pub const BUS_NAME: &str = "org.freedesktop.DBus";
/// Object path of the message bus
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
/// Interface of the message bus
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Invoked with the reply (method return or error message) of a call, or
/// with a transport error if no reply can arrive
pub type ReplyCallback = Box<dyn FnOnce(Result<Message>)>;

/// Invoked for every signal matching a subscription
pub type SignalCallback = Rc<dyn Fn(&Message)>;

/// Work scheduled on the event loop
pub type Task = Box<dyn FnOnce()>;

/// Handle of a signal subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle of an object registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

/// Filter for signal subscriptions; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    /// Required value of the first body argument, which must be a string
    pub arg0: Option<String>,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// The rule in the form sent to a bus daemon's `AddMatch`
    pub fn to_zbus(&self) -> Result<zbus::MatchRule<'static>> {
        let mut builder = zbus::MatchRule::builder().msg_type(zbus::message::Type::Signal);
        if let Some(sender) = &self.sender {
            builder = builder.sender(sender.as_str())?;
        }
        if let Some(path) = &self.path {
            builder = builder.path(path.as_str())?;
        }
        if let Some(interface) = &self.interface {
            builder = builder.interface(interface.as_str())?;
        }
        if let Some(member) = &self.member {
            builder = builder.member(member.as_str())?;
        }
        if let Some(arg0) = &self.arg0 {
            builder = builder.arg(0, arg0.as_str())?;
        }
        Ok(builder.build().to_owned())
    }

    /// Checks a signal against the rule
    ///
    /// `sender_owns` answers whether the message sender currently owns a
    /// given bus name, so rules may name a well-known name as sender.
    pub fn matches(&self, msg: &Message, sender_owns: impl Fn(&str) -> bool) -> bool {
        fn field(rule: &Option<String>, actual: Option<&str>) -> bool {
            rule.as_deref().map_or(true, |want| actual == Some(want))
        }

        if msg.message_type() != MessageType::Signal {
            return false;
        }
        if let Some(sender) = &self.sender {
            if msg.sender() != Some(sender.as_str()) && !sender_owns(sender) {
                return false;
            }
        }
        if !field(&self.path, msg.path())
            || !field(&self.interface, msg.interface())
            || !field(&self.member, msg.member())
        {
            return false;
        }
        match &self.arg0 {
            None => true,
            Some(want) => matches!(msg.body().first(), Some(Value::Str(s)) if s.as_str() == want),
        }
    }
}

/// Receiver of method calls for one registered (path, interface) pair
pub trait ObjectHandler {
    /// Handles a call; returns the reply to send, or `None` if the reply is
    /// deferred (asynchronous method)
    fn handle_call(&self, msg: &Message) -> Option<Message>;

    /// Description of the interface, for introspection
    fn interface_info(&self) -> InterfaceInfo;
}

/// What the binding layer needs from a message bus connection
pub trait Transport {
    /// Unique bus name of this connection (`:1.N`)
    fn unique_name(&self) -> String;

    /// Sends a message, returning the serial assigned to it
    fn send(&self, msg: Message) -> Result<u32>;

    /// Sends a method call; `callback` runs once with its reply
    ///
    /// When an error is returned the callback has been dropped unused.
    fn send_with_reply(&self, msg: Message, callback: ReplyCallback) -> Result<u32>;

    fn subscribe_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<SubscriptionId>;

    fn unsubscribe_signal(&self, id: SubscriptionId);

    /// Asks the bus whether `name` currently has an owner
    fn name_has_owner(&self, name: &str) -> Result<bool>;

    fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Rc<dyn ObjectHandler>,
    ) -> Result<RegistrationId>;

    fn unregister_object(&self, id: RegistrationId);

    /// Requests ownership of a well-known bus name
    fn request_name(&self, name: &str) -> Result<()>;

    /// Schedules a task to run on the event loop once it is idle
    fn idle_add(&self, task: Task);

    /// Disconnects from the bus, dropping registrations and names
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Shared handle to a bus connection
#[derive(Clone)]
pub struct Connection(Rc<dyn Transport>);

impl Connection {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Connection(transport)
    }

    pub fn unique_name(&self) -> String {
        self.0.unique_name()
    }

    pub fn send(&self, msg: Message) -> Result<u32> {
        self.0.send(msg)
    }

    pub fn send_with_reply(&self, msg: Message, callback: ReplyCallback) -> Result<u32> {
        self.0.send_with_reply(msg, callback)
    }

    pub fn subscribe_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<SubscriptionId> {
        self.0.subscribe_signal(rule, callback)
    }

    pub fn unsubscribe_signal(&self, id: SubscriptionId) {
        self.0.unsubscribe_signal(id)
    }

    pub fn name_has_owner(&self, name: &str) -> Result<bool> {
        self.0.name_has_owner(name)
    }

    pub fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Rc<dyn ObjectHandler>,
    ) -> Result<RegistrationId> {
        self.0.register_object(path, interface, handler)
    }

    pub fn unregister_object(&self, id: RegistrationId) {
        self.0.unregister_object(id)
    }

    pub fn request_name(&self, name: &str) -> Result<()> {
        self.0.request_name(name)
    }

    pub fn idle_add(&self, task: impl FnOnce() + 'static) {
        self.0.idle_add(Box::new(task))
    }

    pub fn close(&self) {
        self.0.close()
    }

    pub fn is_open(&self) -> bool {
        self.0.is_open()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connection").field(&self.0.unique_name()).finish()
    }
}
