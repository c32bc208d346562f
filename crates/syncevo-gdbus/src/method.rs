//! Method binding and dispatch
//!
//! [`MethodEntry::new`] turns a native callable into a dispatch closure.
//! The closure extracts the parameters from the call, invokes the callable
//! and builds the reply: return value first, then the output parameters in
//! declaration order. Asynchronous methods (those taking a
//! [`Reply`](crate::Reply)) produce no reply here.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::args::{ArgList, ExtractArgs};
use crate::error::{DBusError, Result};
use crate::introspect::MethodInfo;
use crate::marshal::DBusType;
use crate::message::{self, Message};
use crate::result::ReplyState;
use crate::signature::Signature;
use crate::transport::Connection;
use crate::value::Value;

/// Return type of a bound callable
pub trait IntoReply {
    /// Complete types the return value contributes to the reply
    fn signatures() -> Vec<Signature>;

    /// Appends the return value to the reply body
    fn into_reply(self, body: &mut Vec<Value>) -> Result<()>;
}

impl IntoReply for () {
    fn signatures() -> Vec<Signature> {
        Vec::new()
    }

    fn into_reply(self, _body: &mut Vec<Value>) -> Result<()> {
        Ok(())
    }
}

impl<T: DBusType> IntoReply for T {
    fn signatures() -> Vec<Signature> {
        vec![T::signature()]
    }

    fn into_reply(self, body: &mut Vec<Value>) -> Result<()> {
        body.push(self.to_value()?);
        Ok(())
    }
}

impl<T: IntoReply, E: Into<DBusError>> IntoReply for std::result::Result<T, E> {
    fn signatures() -> Vec<Signature> {
        T::signatures()
    }

    fn into_reply(self, body: &mut Vec<Value>) -> Result<()> {
        self.map_err(Into::into)?.into_reply(body)
    }
}

/// A native callable taking the parameter list `Args`
///
/// Implemented for every `Fn(A1, .., An) -> R` with up to ten parameters.
/// Closures need annotated parameter types.
pub trait MethodHandler<Args>: 'static {
    type Output: IntoReply;

    fn call(&self, args: Args) -> Self::Output;
}

macro_rules! method_handler {
    ($($A:ident),*) => {
        impl<Func, Ret, $($A),*> MethodHandler<($($A,)*)> for Func
        where
            Func: Fn($($A),*) -> Ret + 'static,
            Ret: IntoReply,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn call(&self, args: ($($A,)*)) -> Ret {
                let ($($A,)*) = args;
                (self)($($A),*)
            }
        }
    };
}

method_handler!();
method_handler!(A);
method_handler!(A, B);
method_handler!(A, B, C);
method_handler!(A, B, C, D);
method_handler!(A, B, C, D, E);
method_handler!(A, B, C, D, E, F);
method_handler!(A, B, C, D, E, F, G);
method_handler!(A, B, C, D, E, F, G, H);
method_handler!(A, B, C, D, E, F, G, H, I);
method_handler!(A, B, C, D, E, F, G, H, I, J);

type DispatchFn = Box<dyn Fn(&Connection, &Message) -> Option<Message>>;

/// One method of a registered interface
pub struct MethodEntry {
    name: String,
    in_args: Vec<Signature>,
    out_args: Vec<Signature>,
    asynchronous: bool,
    dispatch: DispatchFn,
}

impl MethodEntry {
    /// Binds `handler` under the member name `name`
    pub fn new<Args, H>(name: &str, handler: H) -> Result<Self>
    where
        Args: ArgList + 'static,
        H: MethodHandler<Args>,
    {
        message::validate_member(name)?;
        let mut out_args = <H::Output as IntoReply>::signatures();
        if Args::ASYNCHRONOUS && (Args::OUTPUTS || !out_args.is_empty()) {
            return Err(DBusError::InvalidArgument(format!(
                "asynchronous method {name} can only reply through its Reply handle"
            )));
        }
        out_args.extend(Args::out_signatures());
        Ok(MethodEntry {
            name: name.to_string(),
            in_args: Args::in_signatures(),
            out_args,
            asynchronous: Args::ASYNCHRONOUS,
            dispatch: Box::new(move |conn: &Connection, msg: &Message| {
                invoke::<Args, H>(&handler, conn, msg)
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Complete types of the call, in order
    pub fn in_args(&self) -> &[Signature] {
        &self.in_args
    }

    /// Complete types of the reply: return value, then outputs
    ///
    /// For asynchronous methods, the types of the [`crate::Reply`] handle.
    pub fn out_args(&self) -> &[Signature] {
        &self.out_args
    }

    pub fn in_signature(&self) -> Signature {
        Signature::concat(&self.in_args)
    }

    pub fn out_signature(&self) -> Signature {
        Signature::concat(&self.out_args)
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Handles one call; `None` means the reply is deferred
    pub fn dispatch(&self, conn: &Connection, msg: &Message) -> Option<Message> {
        (self.dispatch)(conn, msg)
    }

    pub fn info(&self) -> MethodInfo {
        MethodInfo {
            name: self.name.clone(),
            in_args: self.in_args.clone(),
            out_args: self.out_args.clone(),
        }
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("in", &self.in_signature())
            .field("out", &self.out_signature())
            .field("asynchronous", &self.asynchronous)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "method handler panicked".to_string()
    }
}

fn invoke<Args, H>(handler: &H, conn: &Connection, msg: &Message) -> Option<Message>
where
    Args: ArgList,
    H: MethodHandler<Args>,
{
    let member = msg.member().unwrap_or_default();
    debug!(
        member,
        sender = msg.sender().unwrap_or_default(),
        signature = %msg.signature(),
        "Dispatching method call"
    );

    let state = Rc::new(Cell::new(ReplyState::Pending));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<Vec<Value>>> {
        let mut extract = ExtractArgs::new(conn, msg, state.clone());
        let args = Args::extract(&mut extract)?;
        extract.finish()?;
        let appenders = args.appenders();
        let mut body = Vec::new();
        handler.call(args).into_reply(&mut body)?;
        if Args::ASYNCHRONOUS {
            return Ok(None);
        }
        for append in appenders {
            append(&mut body)?;
        }
        Ok(Some(body))
    }));

    let error = match outcome {
        Ok(Ok(Some(body))) => {
            let mut reply = Message::method_return(msg);
            reply.extend(body);
            return Some(reply);
        }
        Ok(Ok(None)) => {
            if state.get() == ReplyState::Pending && Rc::strong_count(&state) == 1 {
                warn!(member, "Asynchronous method returned without keeping its reply handle");
            }
            return None;
        }
        Ok(Err(err)) => err,
        Err(payload) => {
            let text = panic_message(payload.as_ref());
            warn!(member, panic = %text, "Method handler panicked");
            DBusError::Failed(text)
        }
    };

    if state.get() != ReplyState::Pending {
        // The handler completed its reply handle before failing.
        debug!(member, error = %error, "Dropping error of already answered call");
        return None;
    }
    state.set(ReplyState::Failed);
    debug!(member, error = %error, "Method call failed");
    Some(Message::error(msg, &error))
}
