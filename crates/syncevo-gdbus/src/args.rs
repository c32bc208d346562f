//! Argument extraction and append pipeline
//!
//! Each parameter of a bound method is classified through [`MethodArg`]:
//!
//! - any [`DBusType`] is an input, decoded from the next wire value;
//! - [`Out<T>`] is an output slot, appended to the reply after the call;
//! - [`Caller`], [`CallerWatch`] and [`crate::Reply`] are pseudo-parameters
//!   that never touch the wire.
//!
//! Parameter lists are tuples implementing [`ArgList`]; plain value lists
//! (signal payloads, client call arguments and results) implement
//! [`ValueList`].

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::{DBusError, Result};
use crate::marshal::DBusType;
use crate::message::{ArgIter, Message};
use crate::result::ReplyState;
use crate::signature::Signature;
use crate::transport::Connection;
use crate::value::Value;
use crate::watch::PeerWatch;

/// Appends one output value to a reply body
pub type Appender = Box<dyn FnOnce(&mut Vec<Value>) -> Result<()>>;

/// Context available while extracting the arguments of one call
pub struct ExtractArgs<'a> {
    conn: &'a Connection,
    msg: &'a Message,
    iter: ArgIter<'a>,
    reply_state: Rc<Cell<ReplyState>>,
}

impl<'a> ExtractArgs<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        msg: &'a Message,
        reply_state: Rc<Cell<ReplyState>>,
    ) -> Self {
        ExtractArgs {
            conn,
            msg,
            iter: msg.args(),
            reply_state,
        }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// The call being dispatched
    pub fn message(&self) -> &Message {
        self.msg
    }

    /// Cursor over the wire values not consumed yet
    pub fn values(&mut self) -> &mut ArgIter<'a> {
        &mut self.iter
    }

    pub(crate) fn reply_state(&self) -> Rc<Cell<ReplyState>> {
        self.reply_state.clone()
    }

    /// Fails if the call carried more values than the method consumes
    pub fn finish(&self) -> Result<()> {
        match self.iter.remaining() {
            0 => Ok(()),
            n => Err(DBusError::InvalidArgument(format!(
                "{n} unexpected trailing argument(s) after #{}",
                self.iter.position()
            ))),
        }
    }
}

/// A parameter type of a bound method
pub trait MethodArg: Sized {
    /// Whether the parameter defers the reply (result handles only)
    const ASYNCHRONOUS: bool = false;

    /// Whether the parameter is an output slot appended after the call
    const OUTPUT: bool = false;

    /// Wire types consumed from the call; empty for non-inputs
    fn in_signature() -> Signature;

    /// Wire types contributed to the reply; empty for non-outputs
    fn out_signature() -> Signature;

    /// Produces the native argument for one call
    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self>;

    /// For outputs: the step that appends the final value to the reply
    fn appender(&self) -> Option<Appender> {
        None
    }
}

impl<T: DBusType> MethodArg for T {
    fn in_signature() -> Signature {
        T::signature()
    }

    fn out_signature() -> Signature {
        Signature::empty()
    }

    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self> {
        args.values().get::<T>()
    }
}

/// Output parameter of a bound method
///
/// The handler receives a slot initialized with `T::default()` and stores
/// its result with [`Out::set`]; the value is appended to the reply after
/// the handler returns.
pub struct Out<T>(Rc<RefCell<T>>);

impl<T> Out<T> {
    pub fn new(value: T) -> Self {
        Out(Rc::new(RefCell::new(value)))
    }

    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn get(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Modifies the value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.borrow_mut());
    }
}

impl<T> Clone for Out<T> {
    fn clone(&self) -> Self {
        Out(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Out<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Out").field(&*self.0.borrow()).finish()
    }
}

impl<T: DBusType + Default + 'static> MethodArg for Out<T> {
    const OUTPUT: bool = true;

    fn in_signature() -> Signature {
        Signature::empty()
    }

    fn out_signature() -> Signature {
        T::signature()
    }

    fn extract(_args: &mut ExtractArgs<'_>) -> Result<Self> {
        Ok(Out::new(T::default()))
    }

    fn appender(&self) -> Option<Appender> {
        let slot = self.0.clone();
        Some(Box::new(move |body: &mut Vec<Value>| {
            body.push(slot.borrow().to_value()?);
            Ok(())
        }))
    }
}

/// Bus name of the peer that sent the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Deref for Caller {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl MethodArg for Caller {
    fn in_signature() -> Signature {
        Signature::empty()
    }

    fn out_signature() -> Signature {
        Signature::empty()
    }

    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self> {
        Ok(Caller(args.message().sender().unwrap_or_default().to_string()))
    }
}

/// Liveness watch on the peer that sent the call, already activated
///
/// Install the disconnect handler with [`PeerWatch::set_callback`]; it runs
/// right away if the caller has vanished in the meantime.
pub struct CallerWatch(PeerWatch);

impl CallerWatch {
    pub fn into_inner(self) -> PeerWatch {
        self.0
    }
}

impl Deref for CallerWatch {
    type Target = PeerWatch;

    fn deref(&self) -> &PeerWatch {
        &self.0
    }
}

impl MethodArg for CallerWatch {
    fn in_signature() -> Signature {
        Signature::empty()
    }

    fn out_signature() -> Signature {
        Signature::empty()
    }

    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self> {
        let sender = args.message().sender().unwrap_or_default().to_string();
        let watch = PeerWatch::new(args.connection().clone());
        watch.activate(&sender)?;
        Ok(CallerWatch(watch))
    }
}

/// Splits a signature into its complete types, appending them to `out`
fn push_types(out: &mut Vec<Signature>, signature: Signature) {
    if signature.is_empty() {
        return;
    }
    match signature.types() {
        Ok(types) => out.extend(types),
        Err(_) => out.push(signature),
    }
}

/// An ordered parameter list of a bound method
pub trait ArgList: Sized {
    /// True if any parameter defers the reply
    const ASYNCHRONOUS: bool;

    /// True if any parameter is an [`Out`] slot
    const OUTPUTS: bool;

    /// Complete types consumed from the call, in order
    fn in_signatures() -> Vec<Signature>;

    /// Complete types appended to the reply, in order
    fn out_signatures() -> Vec<Signature>;

    fn in_signature() -> Signature {
        Signature::concat(&Self::in_signatures())
    }

    fn out_signature() -> Signature {
        Signature::concat(&Self::out_signatures())
    }

    /// Extracts every parameter, in declaration order
    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self>;

    /// Reply appenders of the output parameters, in declaration order
    fn appenders(&self) -> Vec<Appender>;
}

macro_rules! arg_list {
    ($($A:ident),*) => {
        impl<$($A: MethodArg),*> ArgList for ($($A,)*) {
            const ASYNCHRONOUS: bool = false $(|| $A::ASYNCHRONOUS)*;
            const OUTPUTS: bool = false $(|| $A::OUTPUT)*;

            #[allow(unused_mut)]
            fn in_signatures() -> Vec<Signature> {
                let mut signatures = Vec::new();
                $(push_types(&mut signatures, $A::in_signature());)*
                signatures
            }

            #[allow(unused_mut)]
            fn out_signatures() -> Vec<Signature> {
                let mut signatures = Vec::new();
                $(push_types(&mut signatures, $A::out_signature());)*
                signatures
            }

            #[allow(unused_variables)]
            fn extract(args: &mut ExtractArgs<'_>) -> Result<Self> {
                Ok(($($A::extract(args)?,)*))
            }

            #[allow(non_snake_case, unused_mut)]
            fn appenders(&self) -> Vec<Appender> {
                let ($($A,)*) = self;
                let mut appenders = Vec::new();
                $(appenders.extend($A.appender());)*
                appenders
            }
        }
    };
}

arg_list!();
arg_list!(A);
arg_list!(A, B);
arg_list!(A, B, C);
arg_list!(A, B, C, D);
arg_list!(A, B, C, D, E);
arg_list!(A, B, C, D, E, F);
arg_list!(A, B, C, D, E, F, G);
arg_list!(A, B, C, D, E, F, G, H);
arg_list!(A, B, C, D, E, F, G, H, I);
arg_list!(A, B, C, D, E, F, G, H, I, J);

/// An ordered list of plain wire values
pub trait ValueList: Sized {
    fn signatures() -> Vec<Signature>;

    /// All signatures concatenated, as in a message header
    fn combined_signature() -> Signature {
        Signature::concat(&Self::signatures())
    }

    fn to_values(&self) -> Result<Vec<Value>>;

    /// Decodes exactly `values`, rejecting missing or surplus values
    fn from_values(values: &[Value]) -> Result<Self>;
}

macro_rules! value_list {
    ($($A:ident),*) => {
        impl<$($A: DBusType),*> ValueList for ($($A,)*) {
            fn signatures() -> Vec<Signature> {
                vec![$($A::signature()),*]
            }

            #[allow(non_snake_case)]
            fn to_values(&self) -> Result<Vec<Value>> {
                let ($($A,)*) = self;
                Ok(vec![$($A.to_value()?),*])
            }

            #[allow(unused_mut)]
            fn from_values(values: &[Value]) -> Result<Self> {
                let mut iter = ArgIter::new(values);
                let decoded = ($(iter.get::<$A>()?,)*);
                match iter.remaining() {
                    0 => Ok(decoded),
                    n => Err(DBusError::InvalidArgument(format!(
                        "{n} unexpected trailing value(s) after #{}",
                        iter.position()
                    ))),
                }
            }
        }
    };
}

value_list!();
value_list!(A);
value_list!(A, B);
value_list!(A, B, C);
value_list!(A, B, C, D);
value_list!(A, B, C, D, E);
value_list!(A, B, C, D, E, F);
value_list!(A, B, C, D, E, F, G);
value_list!(A, B, C, D, E, F, G, H);
value_list!(A, B, C, D, E, F, G, H, I);
value_list!(A, B, C, D, E, F, G, H, I, J);
