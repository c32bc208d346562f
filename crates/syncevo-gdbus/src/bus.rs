//! Connection to a real message bus
//!
//! [`ZbusBus`] implements [`Transport`] on top of a blocking zbus connection
//! to the session or system bus. A reader thread forwards every incoming
//! message into a channel; the thread that owns the `ZbusBus` drains it in
//! [`ZbusBus::run_once`], so all handlers and callbacks still run on one
//! thread, exactly as with [`crate::LocalBus`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use zbus::blocking::{fdo::DBusProxy, ConnectionBuilder, MessageIterator};
use zbus::names::BusName;

use crate::error::{DBusError, Result, INVALID_ARGS};
use crate::exports::{ObjectTable, Route};
use crate::message::{self, Message, MessageType};
use crate::transport::{
    Connection, MatchRule, ObjectHandler, RegistrationId, ReplyCallback, SignalCallback,
    SubscriptionId, Task, Transport, BUS_NAME,
};

/// Which bus to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    Session,
    System,
    /// A bus daemon at an explicit D-Bus address
    Address(String),
}

struct Subscription {
    id: SubscriptionId,
    rule: MatchRule,
    callback: SignalCallback,
}

struct ZbusInner {
    conn: zbus::blocking::Connection,
    proxy: DBusProxy<'static>,
    unique_name: String,
    incoming: Receiver<zbus::Result<zbus::Message>>,
    open: Cell<bool>,
    next_handle: Cell<u64>,
    objects: RefCell<ObjectTable>,
    subscriptions: RefCell<Vec<Subscription>>,
    pending: RefCell<BTreeMap<u32, ReplyCallback>>,
    idle: RefCell<VecDeque<Task>>,
}

/// Bus connection and event loop driven from the owning thread
///
/// Handles returned by [`ZbusBus::connection`] stop working once the
/// `ZbusBus` is dropped.
pub struct ZbusBus {
    inner: Rc<ZbusInner>,
}

fn transport_error(err: impl std::fmt::Display) -> DBusError {
    DBusError::Transport(err.to_string())
}

fn serial_of(wire: &zbus::Message) -> u32 {
    wire.primary_header().serial_num().get()
}

impl ZbusBus {
    /// Connects to a bus and starts reading from it
    pub fn connect(address: &BusAddress) -> Result<Self> {
        let conn = match address {
            BusAddress::Session => zbus::blocking::Connection::session()?,
            BusAddress::System => zbus::blocking::Connection::system()?,
            BusAddress::Address(address) => ConnectionBuilder::address(address.as_str())?.build()?,
        };
        Self::from_connection(conn)
    }

    /// Wraps an established bus connection
    pub fn from_connection(conn: zbus::blocking::Connection) -> Result<Self> {
        let unique_name = conn
            .unique_name()
            .map(|name| name.to_string())
            .ok_or_else(|| DBusError::Transport("not connected to a message bus".to_string()))?;

        let (tx, incoming) = mpsc::channel();
        let messages = MessageIterator::from(&conn);
        thread::Builder::new()
            .name("dbus-reader".to_string())
            .spawn(move || {
                for msg in messages {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            })
            .map_err(transport_error)?;

        let proxy = DBusProxy::new(&conn)?;
        info!(peer = %unique_name, "Connected to message bus");
        Ok(ZbusBus {
            inner: Rc::new(ZbusInner {
                conn,
                proxy,
                unique_name,
                incoming,
                open: Cell::new(true),
                next_handle: Cell::new(0),
                objects: RefCell::new(ObjectTable::default()),
                subscriptions: RefCell::new(Vec::new()),
                pending: RefCell::new(BTreeMap::new()),
                idle: RefCell::new(VecDeque::new()),
            }),
        })
    }

    /// Handle for the binding layer
    pub fn connection(&self) -> Connection {
        Connection::new(Rc::new(ZbusConnection {
            bus: Rc::downgrade(&self.inner),
            name: self.inner.unique_name.clone(),
        }))
    }

    pub fn unique_name(&self) -> &str {
        &self.inner.unique_name
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.get()
    }

    /// Handles one incoming message, or runs one idle task if no message is
    /// waiting, blocking up to `timeout` for a message otherwise
    ///
    /// Returns false if nothing happened before the timeout.
    pub fn run_once(&self, timeout: Duration) -> Result<bool> {
        match self.inner.incoming.try_recv() {
            Ok(item) => {
                self.inner.handle(item);
                return Ok(true);
            }
            Err(TryRecvError::Disconnected) => return Err(self.inner.disconnected()),
            Err(TryRecvError::Empty) => {}
        }
        let task = self.inner.idle.borrow_mut().pop_front();
        if let Some(task) = task {
            task();
            return Ok(true);
        }
        match self.inner.incoming.recv_timeout(timeout) {
            Ok(item) => {
                self.inner.handle(item);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(self.inner.disconnected()),
        }
    }

    /// Runs the loop until `done` returns true
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> Result<()> {
        while !done() {
            self.run_once(Duration::from_millis(100))?;
        }
        Ok(())
    }

    /// Runs the loop until the connection is closed
    pub fn run(&self) -> Result<()> {
        self.run_until(|| !self.inner.open.get())
    }
}

impl ZbusInner {
    fn check_open(&self) -> Result<()> {
        if self.open.get() {
            Ok(())
        } else {
            Err(DBusError::Transport(format!(
                "connection {} is closed",
                self.unique_name
            )))
        }
    }

    fn next_handle(&self) -> u64 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }

    fn disconnected(&self) -> DBusError {
        self.shutdown();
        DBusError::Transport("message bus connection lost".to_string())
    }

    fn send_wire(&self, msg: &Message) -> Result<zbus::Message> {
        self.check_open()?;
        let wire = msg.to_zbus(None)?;
        self.conn.send(&wire)?;
        Ok(wire)
    }

    fn handle(&self, item: zbus::Result<zbus::Message>) {
        let wire = match item {
            Ok(wire) => wire,
            Err(err) => {
                warn!(error = %err, "Error reading from message bus");
                return;
            }
        };
        let msg = match Message::from_zbus(&wire) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, serial = serial_of(&wire), "Dropping undecodable message");
                if wire.message_type() == zbus::message::Type::MethodCall {
                    self.reject(&wire, &err);
                }
                return;
            }
        };
        debug!(
            kind = ?msg.message_type(),
            sender = msg.sender().unwrap_or_default(),
            member = msg.member().unwrap_or_default(),
            serial = msg.serial(),
            "Received message"
        );
        match msg.message_type() {
            MessageType::MethodCall => self.handle_call(&msg),
            MessageType::MethodReturn | MessageType::Error => self.handle_reply(msg),
            MessageType::Signal => self.handle_signal(&msg),
        }
    }

    /// Answers a call whose body could not be decoded
    fn reject(&self, call: &zbus::Message, err: &DBusError) {
        let sent = zbus::Message::method_error(call, INVALID_ARGS)
            .and_then(|builder| builder.build(&(err.wire_message(),)))
            .and_then(|reply| self.conn.send(&reply));
        if let Err(err) = sent {
            warn!(error = %err, "Cannot send error reply");
        }
    }

    fn handle_call(&self, msg: &Message) {
        let route = self.objects.borrow().route(msg);
        let reply = match route {
            Route::Object(handler) => handler.handle_call(msg),
            Route::Reply(reply) => Some(reply),
        };
        let Some(reply) = reply else {
            return;
        };
        if let Err(err) = self.send_wire(&reply) {
            warn!(error = %err, "Dropping unsendable reply");
            if let Err(err) = self.send_wire(&Message::error(msg, &err)) {
                warn!(error = %err, "Cannot send error reply");
            }
        }
    }

    fn handle_reply(&self, msg: Message) {
        let Some(serial) = msg.reply_serial() else {
            return;
        };
        let pending = self.pending.borrow_mut().remove(&serial);
        match pending {
            Some(callback) => callback(Ok(msg)),
            None => debug!(serial, "No pending call for reply"),
        }
    }

    fn handle_signal(&self, msg: &Message) {
        let callbacks: Vec<SignalCallback> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.rule.matches(msg, |name| self.sender_owns(msg, name)))
            .map(|sub| sub.callback.clone())
            .collect();
        for callback in callbacks {
            callback(msg);
        }
    }

    /// Whether the sender of `msg` owns the well-known `name`
    fn sender_owns(&self, msg: &Message, name: &str) -> bool {
        let (Some(sender), Ok(bus_name)) = (msg.sender(), BusName::try_from(name)) else {
            return false;
        };
        match self.proxy.get_name_owner(bus_name) {
            Ok(owner) => owner.as_str() == sender,
            Err(_) => false,
        }
    }

    fn shutdown(&self) {
        if !self.open.replace(false) {
            return;
        }
        info!(peer = %self.unique_name, "Connection closed");
        let objects = self.objects.borrow_mut().clear();
        drop(objects);
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for (_, callback) in pending {
            callback(Err(DBusError::Transport("connection closed".to_string())));
        }
    }
}

impl Drop for ZbusInner {
    fn drop(&mut self) {
        // Ends the reader thread, which holds its own handle on the socket.
        if self.open.get() {
            let _ = self.conn.clone().close();
        }
    }
}

/// One handle on a [`ZbusBus`]
struct ZbusConnection {
    bus: Weak<ZbusInner>,
    name: String,
}

impl ZbusConnection {
    fn bus(&self) -> Result<Rc<ZbusInner>> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| DBusError::Transport("message bus connection is gone".to_string()))?;
        bus.check_open()?;
        Ok(bus)
    }
}

impl Transport for ZbusConnection {
    fn unique_name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, msg: Message) -> Result<u32> {
        self.bus()?.send_wire(&msg).map(|wire| serial_of(&wire))
    }

    fn send_with_reply(&self, msg: Message, callback: ReplyCallback) -> Result<u32> {
        if msg.message_type() != MessageType::MethodCall {
            return Err(DBusError::InvalidArgument(
                "only method calls have replies".to_string(),
            ));
        }
        let bus = self.bus()?;
        let wire = msg.to_zbus(None)?;
        let serial = serial_of(&wire);
        bus.pending.borrow_mut().insert(serial, callback);
        if let Err(err) = bus.conn.send(&wire) {
            bus.pending.borrow_mut().remove(&serial);
            return Err(err.into());
        }
        Ok(serial)
    }

    fn subscribe_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<SubscriptionId> {
        let bus = self.bus()?;
        debug!(peer = %self.name, ?rule, "Subscribing to signal");
        bus.proxy.add_match_rule(rule.to_zbus()?)?;
        let id = SubscriptionId(bus.next_handle());
        bus.subscriptions
            .borrow_mut()
            .push(Subscription { id, rule, callback });
        Ok(id)
    }

    fn unsubscribe_signal(&self, id: SubscriptionId) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        // Dropped outside of the borrow; the callback may own other handles.
        let removed: Vec<Subscription> = {
            let mut subscriptions = bus.subscriptions.borrow_mut();
            let (removed, kept) = std::mem::take(&mut *subscriptions)
                .into_iter()
                .partition(|s| s.id == id);
            *subscriptions = kept;
            removed
        };
        if !bus.open.get() {
            return;
        }
        for sub in &removed {
            let result = sub
                .rule
                .to_zbus()
                .and_then(|rule| Ok(bus.proxy.remove_match_rule(rule)?));
            if let Err(err) = result {
                warn!(error = %err, "Cannot remove match rule");
            }
        }
    }

    fn name_has_owner(&self, name: &str) -> Result<bool> {
        let bus = self.bus()?;
        if name == BUS_NAME {
            return Ok(true);
        }
        Ok(bus.proxy.name_has_owner(BusName::try_from(name)?)?)
    }

    fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Rc<dyn ObjectHandler>,
    ) -> Result<RegistrationId> {
        let bus = self.bus()?;
        let id = RegistrationId(bus.next_handle());
        bus.objects
            .borrow_mut()
            .insert(id, path, interface, handler)?;
        Ok(id)
    }

    fn unregister_object(&self, id: RegistrationId) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let removed = bus.objects.borrow_mut().remove(id);
        drop(removed);
    }

    fn request_name(&self, name: &str) -> Result<()> {
        message::validate_bus_name(name)?;
        if name.starts_with(':') || name == BUS_NAME {
            return Err(DBusError::InvalidName(format!(
                "cannot acquire reserved name '{name}'"
            )));
        }
        let bus = self.bus()?;
        bus.conn
            .request_name(name)
            .map_err(|err| DBusError::Failed(format!("cannot acquire name '{name}': {err}")))?;
        info!(peer = %self.name, name, "Acquired bus name");
        Ok(())
    }

    fn idle_add(&self, task: Task) {
        match self.bus.upgrade() {
            Some(bus) => bus.idle.borrow_mut().push_back(task),
            None => debug!(peer = %self.name, "Dropping idle task, bus is gone"),
        }
    }

    fn close(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        if !bus.open.get() {
            return;
        }
        if let Err(err) = bus.conn.clone().close() {
            debug!(error = %err, "Error closing bus connection");
        }
        bus.shutdown();
    }

    fn is_open(&self) -> bool {
        self.bus().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_address_fails_to_connect() {
        let address = BusAddress::Address("unix:path=/nonexistent/syncevo-test-bus".to_string());
        let err = ZbusBus::connect(&address).err().unwrap();
        assert!(matches!(err, DBusError::Transport(_)));
    }

    #[test]
    fn test_malformed_address_fails_to_connect() {
        let address = BusAddress::Address("not an address".to_string());
        assert!(ZbusBus::connect(&address).is_err());
    }
}
