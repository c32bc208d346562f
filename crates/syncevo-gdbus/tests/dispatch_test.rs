//! Integration tests: native handlers exported on a LocalBus and called
//! through DBusClientCall from a second connection.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use syncevo_gdbus::error::{GENERIC_ERROR, INVALID_ARGS, NO_MATCHING_METHOD};
use syncevo_gdbus::{
    Caller, CallerWatch, Connection, DBusClientCall, DBusError, LocalBus, ObjectHelper, Out,
    PeerWatch, RemoteObject, Reply, ReplyState, Result, Variant,
};

const PATH: &str = "/org/example/Test";
const IFACE: &str = "org.example.Test";

struct Fixture {
    bus: LocalBus,
    server: Connection,
    client: Connection,
    object: ObjectHelper,
}

impl Fixture {
    fn new() -> Self {
        let bus = LocalBus::new();
        let server = bus.connect();
        let client = bus.connect();
        let object = ObjectHelper::new(server.clone(), PATH, IFACE).unwrap();
        Fixture {
            bus,
            server,
            client,
            object,
        }
    }

    fn remote(&self) -> RemoteObject {
        RemoteObject::new(self.client.clone(), &self.server.unique_name(), PATH, IFACE).unwrap()
    }

    fn proxy<R: syncevo_gdbus::ValueList + 'static>(&self, method: &str) -> DBusClientCall<R> {
        DBusClientCall::new(&self.remote(), method).unwrap()
    }
}

/// Shared slot receiving the result of a client call
fn slot<T: 'static>() -> (Rc<RefCell<Option<T>>>, impl FnOnce(T) + 'static) {
    let slot = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    (slot, move |value: T| *sink.borrow_mut() = Some(value))
}

#[test]
fn test_echo_with_output_parameter() {
    let fx = Fixture::new();
    fx.object
        .add_method("Echo", |a: String, out: Out<i32>| {
            out.set(a.len() as i32);
        })
        .unwrap();
    fx.object.activate().unwrap();

    let info = fx.object.interface_info();
    let echo = info.method("Echo").unwrap();
    assert_eq!(echo.in_args, ["s"].map(|s| syncevo_gdbus::Signature::new(s).unwrap()));
    assert_eq!(echo.out_args, ["i"].map(|s| syncevo_gdbus::Signature::new(s).unwrap()));

    let (result, done) = slot();
    fx.proxy::<(i32,)>("Echo").call(("hello".to_string(),), done);
    fx.bus.run_until_idle();

    assert_eq!(result.borrow_mut().take().unwrap().unwrap(), (5,));
}

#[test]
fn test_return_value_comes_before_outputs() {
    let fx = Fixture::new();
    fx.object
        .add_method(
            "Split",
            |first: Out<String>, text: String, rest: Out<Vec<String>>| -> u32 {
                let mut parts = text.split(',').map(str::to_string);
                first.set(parts.next().unwrap_or_default());
                rest.set(parts.collect());
                text.len() as u32
            },
        )
        .unwrap();
    fx.object.activate().unwrap();

    let (result, done) = slot();
    fx.proxy::<(u32, String, Vec<String>)>("Split")
        .call(("a,b,c".to_string(),), done);
    fx.bus.run_until_idle();

    assert_eq!(
        result.borrow_mut().take().unwrap().unwrap(),
        (5, "a".to_string(), vec!["b".to_string(), "c".to_string()])
    );
}

#[test]
fn test_unknown_method_has_no_side_effects() {
    let fx = Fixture::new();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    fx.object
        .add_method("Count", move || counter.set(counter.get() + 1))
        .unwrap();
    fx.object.activate().unwrap();

    let (result, done) = slot();
    fx.proxy::<()>("Missing").call((), done);
    fx.bus.run_until_idle();

    let err = result.borrow_mut().take().unwrap().unwrap_err();
    assert_eq!(
        err,
        DBusError::Remote {
            name: NO_MATCHING_METHOD.to_string(),
            message: "No methods registered with this name".to_string(),
        }
    );
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_argument_type_and_count_are_checked() {
    let fx = Fixture::new();
    fx.object
        .add_method("Echo", |a: String| -> String { a })
        .unwrap();
    fx.object.activate().unwrap();

    let (wrong_type, done) = slot();
    fx.proxy::<(String,)>("Echo").call((42i32,), done);
    let (too_many, done) = slot();
    fx.proxy::<(String,)>("Echo")
        .call(("a".to_string(), "b".to_string()), done);
    let (missing, done) = slot();
    fx.proxy::<(String,)>("Echo").call((), done);
    fx.bus.run_until_idle();

    for result in [wrong_type, too_many, missing] {
        let err = result.borrow_mut().take().unwrap().unwrap_err();
        assert_eq!(err.dbus_name(), INVALID_ARGS, "{err}");
    }
}

#[test]
fn test_handler_errors_and_panics_become_error_replies() {
    let fx = Fixture::new();
    fx.object
        .add_method("Refuse", |_caller: Caller| -> Result<()> {
            Err(DBusError::callable("org.example.Refused", "not today"))
        })
        .unwrap();
    fx.object
        .add_method("Fail", || -> anyhow::Result<u32> { Err(anyhow::anyhow!("disk full")) })
        .unwrap();
    fx.object
        .add_method("Boom", || -> i32 { panic!("kaboom") })
        .unwrap();
    fx.object.activate().unwrap();

    let (refused, done) = slot();
    fx.proxy::<()>("Refuse").call((), done);
    let (failed, done) = slot();
    fx.proxy::<(u32,)>("Fail").call((), done);
    let (boom, done) = slot();
    fx.proxy::<(i32,)>("Boom").call((), done);
    fx.bus.run_until_idle();

    assert_eq!(
        refused.borrow_mut().take().unwrap().unwrap_err(),
        DBusError::Remote {
            name: "org.example.Refused".into(),
            message: "not today".into(),
        }
    );
    assert_eq!(
        failed.borrow_mut().take().unwrap().unwrap_err(),
        DBusError::Remote {
            name: GENERIC_ERROR.into(),
            message: "disk full".into(),
        }
    );
    assert_eq!(
        boom.borrow_mut().take().unwrap().unwrap_err(),
        DBusError::Remote {
            name: GENERIC_ERROR.into(),
            message: "kaboom".into(),
        }
    );
}

#[test]
fn test_async_reply_is_sent_exactly_once() {
    let fx = Fixture::new();
    let stash: Rc<RefCell<Option<Reply<(String,)>>>> = Rc::new(RefCell::new(None));
    let keep = stash.clone();
    fx.object
        .add_method("Later", move |reply: Reply<(String,)>, _delay: i32| {
            *keep.borrow_mut() = Some(reply);
        })
        .unwrap();
    fx.object.activate().unwrap();
    assert_eq!(
        fx.object.interface_info().method("Later").unwrap().out_args,
        vec![syncevo_gdbus::Signature::new("s").unwrap()]
    );

    let (result, done) = slot();
    fx.proxy::<(String,)>("Later").call((10i32,), done);
    fx.bus.run_until_idle();
    assert!(result.borrow().is_none(), "reply must wait for the handle");

    let reply = stash.borrow_mut().take().unwrap();
    assert_eq!(reply.caller(), fx.client.unique_name());
    reply.done(("finished".to_string(),)).unwrap();
    assert_eq!(
        reply.done(("again".to_string(),)),
        Err(DBusError::AlreadyReplied)
    );
    assert_eq!(
        reply.failed(DBusError::Failed("late".into())),
        Err(DBusError::AlreadyReplied)
    );
    assert_eq!(reply.state(), ReplyState::Completed);

    // Exactly one message is in flight: the method return.
    assert_eq!(fx.bus.run_until_idle(), 1);
    assert_eq!(
        result.borrow_mut().take().unwrap().unwrap(),
        ("finished".to_string(),)
    );
}

#[test]
fn test_async_handler_error_fails_the_handle() {
    let fx = Fixture::new();
    let stash: Rc<RefCell<Option<Reply<()>>>> = Rc::new(RefCell::new(None));
    let keep = stash.clone();
    fx.object
        .add_method("Start", move |reply: Reply<()>| -> Result<()> {
            *keep.borrow_mut() = Some(reply);
            Err(DBusError::callable("org.example.Busy", "busy"))
        })
        .unwrap();
    fx.object.activate().unwrap();

    let (result, done) = slot();
    fx.proxy::<()>("Start").call((), done);
    fx.bus.run_until_idle();

    assert_eq!(
        result.borrow_mut().take().unwrap().unwrap_err().dbus_name(),
        "org.example.Busy"
    );
    let reply = stash.borrow_mut().take().unwrap();
    assert_eq!(reply.state(), ReplyState::Failed);
    assert_eq!(reply.done(()), Err(DBusError::AlreadyReplied));
    assert_eq!(fx.bus.run_until_idle(), 0);
}

#[test]
fn test_async_handle_completed_inside_handler() {
    let fx = Fixture::new();
    fx.object
        .add_method("Now", |reply: Reply<(bool,)>| -> Result<()> {
            reply.done((true,))?;
            // The error is dropped: the call is already answered.
            Err(DBusError::Failed("after the fact".into()))
        })
        .unwrap();
    fx.object.activate().unwrap();

    let (result, done) = slot();
    fx.proxy::<(bool,)>("Now").call((), done);
    fx.bus.run_until_idle();
    assert_eq!(result.borrow_mut().take().unwrap().unwrap(), (true,));
}

#[test]
fn test_variant_of_unexpected_type_is_tolerated() {
    let fx = Fixture::new();
    fx.object
        .add_method("Take", |value: Variant<i32>, seen: Out<i32>| {
            seen.set(value.get().copied().unwrap_or(-1));
        })
        .unwrap();
    fx.object.activate().unwrap();

    let (text, done) = slot();
    fx.proxy::<(i32,)>("Take")
        .call((Variant::Value("not a number".to_string()),), done);
    let (number, done) = slot();
    fx.proxy::<(i32,)>("Take").call((Variant::Value(4i32),), done);
    fx.bus.run_until_idle();

    assert_eq!(text.borrow_mut().take().unwrap().unwrap(), (-1,));
    assert_eq!(number.borrow_mut().take().unwrap().unwrap(), (4,));
}

#[test]
fn test_nested_values_survive_the_wire() {
    type Nested = Vec<HashMap<String, (String, i32, f64)>>;

    let fx = Fixture::new();
    fx.object
        .add_method("Mirror", |value: Nested| -> Nested { value })
        .unwrap();
    fx.object.activate().unwrap();

    let mut entry = HashMap::new();
    entry.insert("addressbook".to_string(), ("vcard".to_string(), 3, 0.25));
    entry.insert("calendar".to_string(), ("ical".to_string(), -1, 1e10));
    let sent: Nested = vec![entry, HashMap::new()];

    let (result, done) = slot();
    fx.proxy::<(Nested,)>("Mirror").call((sent.clone(),), done);
    fx.bus.run_until_idle();

    assert_eq!(result.borrow_mut().take().unwrap().unwrap(), (sent,));
}

#[test]
fn test_send_failure_reaches_callback_once() {
    let fx = Fixture::new();
    fx.object.add_method("Ping", || {}).unwrap();
    fx.object.activate().unwrap();
    let proxy = fx.proxy::<()>("Ping");
    fx.client.close();

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    proxy.call((), move |result: Result<()>| {
        assert!(matches!(result, Err(DBusError::Transport(_))));
        counter.set(counter.get() + 1);
    });
    assert_eq!(calls.get(), 1);
    fx.bus.run_until_idle();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_deactivated_object_is_unknown() {
    let fx = Fixture::new();
    fx.object.add_method("Ping", || {}).unwrap();
    fx.object.activate().unwrap();
    fx.object.deactivate();

    let (result, done) = slot();
    fx.proxy::<()>("Ping").call((), done);
    fx.bus.run_until_idle();
    assert_eq!(
        result.borrow_mut().take().unwrap().unwrap_err().dbus_name(),
        syncevo_gdbus::local::UNKNOWN_OBJECT
    );
}

#[test]
fn test_caller_watch_reports_disconnect() {
    let fx = Fixture::new();
    let watches: Rc<RefCell<Vec<PeerWatch>>> = Rc::new(RefCell::new(Vec::new()));
    let lost = Rc::new(Cell::new(0));
    let (keep, count) = (watches.clone(), lost.clone());
    fx.object
        .add_method("Subscribe", move |watch: CallerWatch| {
            let watch = watch.into_inner();
            let count = count.clone();
            watch.set_callback(move || count.set(count.get() + 1));
            keep.borrow_mut().push(watch);
        })
        .unwrap();
    fx.object.activate().unwrap();

    let (result, done) = slot();
    fx.proxy::<()>("Subscribe").call((), done);
    fx.bus.run_until_idle();
    assert!(result.borrow_mut().take().unwrap().is_ok());
    assert_eq!(lost.get(), 0);

    fx.client.close();
    fx.bus.run_until_idle();
    assert_eq!(lost.get(), 1);
    assert!(watches.borrow()[0].is_disconnected());
}

#[test]
fn test_introspection_lists_methods() {
    let fx = Fixture::new();
    fx.object
        .add_method("GetStatus", |_server: String, status: Out<String>, sources: Out<Vec<String>>| {
            status.set("idle".into());
            sources.set(Vec::new());
        })
        .unwrap();
    fx.object.activate().unwrap();

    let remote = RemoteObject::new(
        fx.client.clone(),
        &fx.server.unique_name(),
        PATH,
        syncevo_gdbus::introspect::INTROSPECTABLE,
    )
    .unwrap();
    let introspect: DBusClientCall<(String,)> = DBusClientCall::new(&remote, "Introspect").unwrap();
    let (result, done) = slot();
    introspect.call((), done);
    fx.bus.run_until_idle();

    let (xml,) = result.borrow_mut().take().unwrap().unwrap();
    assert!(xml.contains("<interface name=\"org.example.Test\">"));
    assert!(xml.contains(
        "<method name=\"GetStatus\">\n      <arg type=\"s\" direction=\"in\"/>\n      \
         <arg type=\"s\" direction=\"out\"/>\n      <arg type=\"as\" direction=\"out\"/>"
    ));
}
