//! Wire messages
//!
//! A [`Message`] is one unit exchanged over a [`crate::Transport`]: a method
//! call, a method return, an error reply or a signal. Header fields are kept
//! as plain strings (validated on construction), the body as a sequence of
//! [`Value`]s whose concatenated signatures form the message signature.
//! Transports convert to and from [`zbus::Message`] with
//! [`Message::to_zbus`] and [`Message::from_zbus`].

use zbus::message::Type;

use crate::codec;
use crate::error::{DBusError, Result};
use crate::marshal::DBusType;
use crate::signature::Signature;
use crate::value::{self, ObjectPath, Value};

/// Kind of a wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

impl From<Type> for MessageType {
    fn from(kind: Type) -> Self {
        match kind {
            Type::MethodCall => MessageType::MethodCall,
            Type::MethodReturn => MessageType::MethodReturn,
            Type::Error => MessageType::Error,
            Type::Signal => MessageType::Signal,
        }
    }
}

/// A D-Bus message: header fields plus body values
#[derive(Debug)]
pub struct Message {
    kind: MessageType,
    serial: u32,
    reply_serial: Option<u32>,
    sender: Option<String>,
    destination: Option<String>,
    path: Option<ObjectPath>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    body: Vec<Value>,
    /// Wire form this message was decoded from
    received: Option<zbus::Message>,
    /// Wire form of the call a return or error answers
    reply_to: Option<zbus::Message>,
}

pub(crate) fn validate_bus_name(name: &str) -> Result<()> {
    zbus::names::BusName::try_from(name)
        .map(|_| ())
        .map_err(|e| DBusError::InvalidName(format!("bus name '{name}': {e}")))
}

pub(crate) fn validate_interface(name: &str) -> Result<()> {
    zbus::names::InterfaceName::try_from(name)
        .map(|_| ())
        .map_err(|e| DBusError::InvalidName(format!("interface '{name}': {e}")))
}

pub(crate) fn validate_member(name: &str) -> Result<()> {
    zbus::names::MemberName::try_from(name)
        .map(|_| ())
        .map_err(|e| DBusError::InvalidName(format!("member '{name}': {e}")))
}

impl Message {
    fn empty(kind: MessageType) -> Self {
        Message {
            kind,
            serial: 0,
            reply_serial: None,
            sender: None,
            destination: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            body: Vec::new(),
            received: None,
            reply_to: None,
        }
    }

    /// Creates a method call with an empty body
    pub fn method_call(
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<Self> {
        if let Some(destination) = destination {
            validate_bus_name(destination)?;
        }
        validate_interface(interface)?;
        validate_member(member)?;
        let mut msg = Message::empty(MessageType::MethodCall);
        msg.destination = destination.map(str::to_string);
        msg.path = Some(ObjectPath::new(path)?);
        msg.interface = Some(interface.to_string());
        msg.member = Some(member.to_string());
        Ok(msg)
    }

    /// Creates a broadcast signal with an empty body
    pub fn signal(path: &str, interface: &str, member: &str) -> Result<Self> {
        validate_interface(interface)?;
        validate_member(member)?;
        let mut msg = Message::empty(MessageType::Signal);
        msg.path = Some(ObjectPath::new(path)?);
        msg.interface = Some(interface.to_string());
        msg.member = Some(member.to_string());
        Ok(msg)
    }

    /// Creates the (empty) method return for `call`
    pub fn method_return(call: &Message) -> Self {
        let mut msg = Message::empty(MessageType::MethodReturn);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg.reply_to = call.received.clone();
        msg
    }

    /// Creates an error reply for `call`
    ///
    /// The body holds a single string, the error text.
    pub fn error(call: &Message, err: &DBusError) -> Self {
        let mut msg = Message::empty(MessageType::Error);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg.reply_to = call.received.clone();
        msg.error_name = Some(err.dbus_name().to_string());
        msg.body.push(Value::from(err.wire_message()));
        msg
    }

    /// Copy of the header fields, without the body
    pub(crate) fn header_only(&self) -> Self {
        Message {
            kind: self.kind,
            serial: self.serial,
            reply_serial: self.reply_serial,
            sender: self.sender.clone(),
            destination: self.destination.clone(),
            path: self.path.clone(),
            interface: self.interface.clone(),
            member: self.member.clone(),
            error_name: self.error_name.clone(),
            body: Vec::new(),
            received: self.received.clone(),
            reply_to: self.reply_to.clone(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.kind
    }

    /// Serial assigned by the transport when the message was sent; 0 before
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_ref().map(ObjectPath::as_str)
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    /// Text of an error reply: its first body value, if that is a string
    pub fn error_text(&self) -> Option<&str> {
        match self.body.first() {
            Some(Value::Str(text)) if self.kind == MessageType::Error => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    pub fn into_body(self) -> Vec<Value> {
        self.body
    }

    /// Signature of the body
    pub fn signature(&self) -> Signature {
        value::body_signature(&self.body)
    }

    /// Appends one value to the body
    pub fn append(&mut self, value: Value) {
        self.body.push(value);
    }

    /// Appends several values to the body
    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.body.extend(values);
    }

    /// Cursor over the body values
    pub fn args(&self) -> ArgIter<'_> {
        ArgIter::new(&self.body)
    }

    pub fn set_destination(&mut self, destination: &str) -> Result<()> {
        validate_bus_name(destination)?;
        self.destination = Some(destination.to_string());
        Ok(())
    }

    /// Decodes a message received from a bus
    pub fn from_zbus(wire: &zbus::Message) -> Result<Self> {
        let header = wire.header();
        let mut msg = Message::empty(wire.message_type().into());
        msg.serial = wire.primary_header().serial_num().get();
        msg.reply_serial = header.reply_serial().map(|serial| serial.get());
        msg.sender = header.sender().map(|name| name.to_string());
        msg.destination = header.destination().map(|name| name.to_string());
        msg.path = header.path().map(ObjectPath::from);
        msg.interface = header.interface().map(|name| name.to_string());
        msg.member = header.member().map(|name| name.to_string());
        msg.error_name = header.error_name().map(|name| name.to_string());

        let body = wire.body();
        let signature = body
            .signature()
            .map(|signature| Signature::from(&signature))
            .unwrap_or_default();
        msg.body = codec::decode_data(&signature, body.data())?;
        msg.received = Some(wire.clone());
        Ok(msg)
    }

    /// Encodes the message for a bus
    ///
    /// Returns and errors can only be encoded for calls that were themselves
    /// decoded with [`Message::from_zbus`]; the reply serial comes from there.
    pub fn to_zbus(&self, sender: Option<&str>) -> Result<zbus::Message> {
        let missing = |field: &str| {
            DBusError::InvalidArgument(format!("{:?} message without {field}", self.kind))
        };
        let builder = match self.kind {
            MessageType::MethodCall => {
                let path = self.path().ok_or_else(|| missing("path"))?;
                let member = self.member().ok_or_else(|| missing("member"))?;
                let mut builder = zbus::Message::method(path, member)?;
                if let Some(interface) = self.interface() {
                    builder = builder.interface(interface)?;
                }
                builder
            }
            MessageType::Signal => {
                let path = self.path().ok_or_else(|| missing("path"))?;
                let interface = self.interface().ok_or_else(|| missing("interface"))?;
                let member = self.member().ok_or_else(|| missing("member"))?;
                zbus::Message::signal(path, interface, member)?
            }
            MessageType::MethodReturn => {
                let call = self.reply_to.as_ref().ok_or_else(|| missing("received call"))?;
                zbus::Message::method_reply(call)?
            }
            MessageType::Error => {
                let call = self.reply_to.as_ref().ok_or_else(|| missing("received call"))?;
                let name = self.error_name().ok_or_else(|| missing("error name"))?;
                zbus::Message::method_error(call, name)?
            }
        };
        let builder = match (self.kind, self.destination()) {
            (MessageType::MethodCall | MessageType::Signal, Some(destination)) => {
                builder.destination(destination)?
            }
            _ => builder,
        };
        let builder = match sender {
            Some(sender) => builder.sender(sender)?,
            None => builder,
        };
        if self.body.is_empty() {
            Ok(builder.build(&())?)
        } else {
            Ok(builder.build(&codec::body_structure(&self.body)?)?)
        }
    }
}

/// Sequential reader over the body of a message
#[derive(Debug, Clone)]
pub struct ArgIter<'a> {
    values: &'a [Value],
    pos: usize,
}

impl<'a> ArgIter<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        ArgIter { values, pos: 0 }
    }

    /// Returns the next value, failing with `InvalidArgument` if there is none
    pub fn next_value(&mut self) -> Result<&'a Value> {
        let value = self.values.get(self.pos).ok_or_else(|| {
            DBusError::InvalidArgument(format!("missing argument #{}", self.pos + 1))
        })?;
        self.pos += 1;
        Ok(value)
    }

    /// Decodes the next value as `T`
    pub fn get<T: DBusType>(&mut self) -> Result<T> {
        let position = self.pos + 1;
        let value = self.next_value()?;
        T::from_value(value).map_err(|e| match e {
            DBusError::InvalidArgument(msg) => {
                DBusError::InvalidArgument(format!("argument #{position}: {msg}"))
            }
            other => other,
        })
    }

    /// Decodes the next value into an existing `T`
    pub fn merge<T: DBusType>(&mut self, target: &mut T) -> Result<()> {
        let value = self.next_value()?;
        target.merge_from(value)
    }

    /// Number of values not yet read
    pub fn remaining(&self) -> usize {
        self.values.len() - self.pos
    }

    /// Number of values read so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_call_validates_names() {
        assert!(Message::method_call(
            Some("org.syncevolution"),
            "/org/syncevolution/Server",
            "org.syncevolution.Server",
            "GetServers"
        )
        .is_ok());
        assert!(matches!(
            Message::method_call(None, "/ok", "no_dots", "Member"),
            Err(DBusError::InvalidName(_))
        ));
        assert!(matches!(
            Message::method_call(None, "/ok", "org.example.Iface", "bad.member"),
            Err(DBusError::InvalidName(_))
        ));
        assert!(matches!(
            Message::signal("not-a-path", "org.example.Iface", "Changed"),
            Err(DBusError::InvalidName(_))
        ));
    }

    #[test]
    fn test_arg_iter_reports_missing_values() {
        let mut msg = Message::signal("/obj", "org.example.Iface", "Changed").unwrap();
        msg.append(Value::from("addr"));
        let mut args = msg.args();
        assert_eq!(args.get::<String>().unwrap(), "addr");
        assert_eq!(args.remaining(), 0);
        let err = args.get::<i32>().unwrap_err();
        assert_eq!(err, DBusError::InvalidArgument("missing argument #2".into()));
    }

    #[test]
    fn test_arg_iter_reports_type_mismatch_position() {
        let mut msg = Message::signal("/obj", "org.example.Iface", "Changed").unwrap();
        msg.extend([Value::I32(1), Value::I32(2)]);
        let mut args = msg.args();
        let _ = args.get::<i32>().unwrap();
        let err = args.get::<String>().unwrap_err();
        match err {
            DBusError::InvalidArgument(text) => assert!(text.starts_with("argument #2")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn received(msg: &Message, sender: &str) -> Message {
        Message::from_zbus(&msg.to_zbus(Some(sender)).unwrap()).unwrap()
    }

    #[test]
    fn test_zbus_roundtrip_preserves_header_and_body() {
        let mut msg = Message::method_call(
            Some("org.syncevolution"),
            "/org/syncevolution/Server",
            "org.syncevolution.Server",
            "GetServerConfig",
        )
        .unwrap();
        msg.extend([
            Value::from("addr"),
            Value::I32(3),
            vec!["x".to_string()].to_value().unwrap(),
        ]);

        let call = received(&msg, ":1.7");
        assert_eq!(call.message_type(), MessageType::MethodCall);
        assert_ne!(call.serial(), 0);
        assert_eq!(call.sender(), Some(":1.7"));
        assert_eq!(call.destination(), Some("org.syncevolution"));
        assert_eq!(call.path(), Some("/org/syncevolution/Server"));
        assert_eq!(call.interface(), Some("org.syncevolution.Server"));
        assert_eq!(call.member(), Some("GetServerConfig"));
        assert_eq!(call.body(), msg.body());
        assert_eq!(call.signature(), "sias");
    }

    #[test]
    fn test_replies_answer_the_received_call() {
        let msg = Message::method_call(None, "/obj", "org.example.Iface", "Frobnicate").unwrap();
        let call = received(&msg, ":1.7");

        let mut ret = Message::method_return(&call);
        ret.append(Value::U32(5));
        let ret = received(&ret, ":1.2");
        assert_eq!(ret.message_type(), MessageType::MethodReturn);
        assert_eq!(ret.reply_serial(), Some(call.serial()));
        assert_eq!(ret.destination(), Some(":1.7"));
        assert_eq!(ret.body(), &[Value::U32(5)]);

        let err = Message::error(&call, &DBusError::callable("org.example.Busy", "busy"));
        let err = received(&err, ":1.2");
        assert_eq!(err.error_name(), Some("org.example.Busy"));
        assert_eq!(err.error_text(), Some("busy"));
        assert_eq!(err.reply_serial(), Some(call.serial()));
    }

    #[test]
    fn test_reply_to_unsent_call_cannot_be_encoded() {
        let call = Message::method_call(None, "/obj", "org.example.Iface", "Frobnicate").unwrap();
        let ret = Message::method_return(&call);
        assert!(matches!(ret.to_zbus(None), Err(DBusError::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_body_is_not_encoded() {
        let mut msg = Message::signal("/obj", "org.example.Iface", "Changed").unwrap();
        msg.extend((0..300).map(Value::I32));
        assert!(matches!(msg.to_zbus(None), Err(DBusError::InvalidArgument(_))));
    }
}
