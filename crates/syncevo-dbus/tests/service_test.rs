//! Integration tests: the sync service and its client proxy on one bus.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use syncevo_core::config::{Config, ConfigBuilder, ServerConfig, SourceConfig};
use syncevo_core::domain::{ProgressEvent, ProgressKind, SyncMode};
use syncevo_core::simulated::SimulatedEngine;
use syncevo_dbus::{ConfigOption, SourceSelection, SyncServer, SyncevoService, DBUS_NAME, DBUS_PATH};
use syncevo_gdbus::{Connection, LocalBus, Result};

struct Fixture {
    bus: LocalBus,
    server: Rc<SyncServer>,
    client: Connection,
    proxy: SyncevoService,
}

fn config() -> Config {
    ConfigBuilder::new()
        .server(
            "work",
            ServerConfig::new("http://sync.example.com/work")
                .with_credentials("alice", "secret")
                .with_source("addressbook", SourceConfig::new("card", SyncMode::TwoWay))
                .with_source("calendar", SourceConfig::new("event", SyncMode::Slow)),
        )
        .server(
            "ask",
            ServerConfig::new("http://sync.example.com/ask")
                .with_source("memo", SourceConfig::new("note", SyncMode::TwoWay)),
        )
        .build()
}

fn fixture() -> Fixture {
    let bus = LocalBus::new();
    let server = SyncServer::new(
        bus.connect(),
        config(),
        Box::new(SimulatedEngine::new().with_items(1)),
    )
    .unwrap();
    let client = bus.connect();
    let proxy = SyncevoService::new(client.clone(), DBUS_NAME, DBUS_PATH).unwrap();
    Fixture {
        bus,
        server,
        client,
        proxy,
    }
}

type Slot<T> = Rc<RefCell<Option<Result<T>>>>;

fn slot<T: 'static>() -> (Slot<T>, impl FnOnce(Result<T>)) {
    let slot: Slot<T> = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    (slot, move |result: Result<T>| {
        assert!(sink.borrow_mut().replace(result).is_none());
    })
}

fn take<T>(slot: &Slot<T>) -> Result<T> {
    slot.borrow_mut().take().expect("callback did not run")
}

fn error_name<T: std::fmt::Debug>(slot: &Slot<T>) -> String {
    take(slot).unwrap_err().dbus_name().to_string()
}

#[test]
fn test_config_crud() {
    let fx = fixture();
    let (servers, done) = slot();
    fx.proxy.get_servers(done);
    let (templates, done) = slot();
    fx.proxy.get_templates(done);
    let (work, done) = slot();
    fx.proxy.get_server_config("work", done);
    let (template, done) = slot();
    fx.proxy.get_server_config("funambol", done);
    fx.bus.run_until_idle();

    assert_eq!(take(&servers).unwrap(), vec!["ask", "work"]);
    assert!(take(&templates).unwrap().contains(&"scheduleworld".to_string()));
    let work = take(&work).unwrap();
    assert!(work.contains(&ConfigOption::new("", "syncURL", "http://sync.example.com/work")));
    assert!(work.contains(&ConfigOption::new("calendar", "sync", "slow")));
    assert!(work.iter().all(|option| option.key != "password"));
    assert!(take(&template)
        .unwrap()
        .contains(&ConfigOption::new("", "syncURL", "http://my.funambol.com/sync")));

    let (created, done) = slot();
    fx.proxy.set_server_config(
        "home",
        vec![
            ConfigOption::new("", "syncURL", "http://home.example.com"),
            ConfigOption::new("todo", "uri", "task"),
            ConfigOption::new("todo", "sync", "one-way-from-server"),
        ],
        done,
    );
    let (bad_mode, done) = slot();
    fx.proxy.set_server_config(
        "other",
        vec![
            ConfigOption::new("", "syncURL", "http://other.example.com"),
            ConfigOption::new("todo", "sync", "sideways"),
        ],
        done,
    );
    let (from_template, done) = slot();
    fx.proxy.set_server_config("scheduleworld", Vec::new(), done);
    fx.bus.run_until_idle();
    take(&created).unwrap();
    assert_eq!(
        error_name(&bad_mode),
        "org.syncevolution.Exception.InvalidConfig"
    );
    take(&from_template).unwrap();

    let config = fx.server.config();
    assert_eq!(
        config.servers["home"].sources["todo"].sync,
        SyncMode::OneWayFromServer
    );
    assert!(config.servers.contains_key("scheduleworld"));
    assert!(!config.servers.contains_key("other"));

    let (removed, done) = slot();
    fx.proxy.remove_server_config("home", done);
    let (missing, done) = slot();
    fx.proxy.remove_server_config("nowhere", done);
    fx.bus.run_until_idle();
    take(&removed).unwrap();
    assert_eq!(
        error_name(&missing),
        "org.syncevolution.Exception.NoSuchServer"
    );
    assert!(!fx.server.config().servers.contains_key("home"));
}

#[test]
fn test_set_server_config_keeps_password() {
    let fx = fixture();
    let (options, done) = slot();
    fx.proxy.get_server_config("work", done);
    fx.bus.run_until_idle();
    let options = take(&options).unwrap();

    let (stored, done) = slot();
    fx.proxy.set_server_config("work", options, done);
    fx.bus.run_until_idle();
    take(&stored).unwrap();
    assert_eq!(fx.server.config().servers["work"].password, "secret");
}

#[test]
fn test_config_changes_are_saved() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fx.server.set_config_path(path.clone());

    let (stored, done) = slot();
    fx.proxy.set_server_config(
        "home",
        vec![ConfigOption::new("", "syncURL", "http://home.example.com")],
        done,
    );
    fx.bus.run_until_idle();
    take(&stored).unwrap();

    let saved = Config::load(&path).unwrap();
    assert_eq!(saved.servers["home"].sync_url, "http://home.example.com");
    assert!(saved.servers.contains_key("work"));
}

#[test]
fn test_full_sync() {
    let fx = fixture();
    let events: Rc<RefCell<Vec<(String, ProgressEvent)>>> = Rc::default();
    let sink = events.clone();
    fx.proxy
        .on_progress(move |server, event| sink.borrow_mut().push((server.to_string(), event)))
        .unwrap();
    let messages: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = messages.clone();
    fx.proxy
        .on_server_message(move |_, text| sink.borrow_mut().push(text.to_string()))
        .unwrap();

    let (finished, done) = slot();
    fx.proxy.start_sync("work", Vec::new(), done);
    fx.bus.run_until_idle();
    take(&finished).unwrap();
    assert_eq!(fx.server.active_sync(), None);

    let events = events.borrow();
    assert!(events.iter().all(|(server, _)| server == "work"));
    assert_eq!(events.first().unwrap().1.kind, ProgressKind::SyncStart);
    assert_eq!(events.last().unwrap().1.kind, ProgressKind::SyncEnd);
    assert!(events.contains(&(
        "work".to_string(),
        ProgressEvent::source("addressbook", ProgressKind::SourceEnd, [1, 1, 0])
    )));
    assert_eq!(
        *messages.borrow(),
        vec!["work: synchronized 2 source(s)".to_string()]
    );

    let (reports, done) = slot();
    fx.proxy.get_sync_reports("work", 10, done);
    fx.bus.run_until_idle();
    let reports: Vec<BTreeMap<String, String>> = take(&reports).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["status"], "ok");
    assert_eq!(reports[0]["source-calendar-mode"], "slow");
}

#[test]
fn test_selected_sources_and_status() {
    let fx = fixture();
    let (finished, done) = slot();
    fx.proxy.start_sync(
        "work",
        vec![SourceSelection::new("calendar", Some(SyncMode::RefreshFromServer))],
        done,
    );
    // Deliver the call only; the engine has not stepped yet
    fx.bus.run_once();
    let (status, done) = slot();
    fx.proxy.get_status("work", done);
    let (idle, done) = slot();
    fx.proxy.get_status("ask", done);
    let (unknown, done) = slot();
    fx.proxy.get_status("nowhere", done);
    fx.bus.run_until_idle();

    let (state, sources) = take(&status).unwrap();
    assert_eq!(state, "running");
    assert_eq!(sources, vec!["calendar"]);
    assert_eq!(take(&idle).unwrap(), ("idle".to_string(), Vec::new()));
    assert_eq!(
        error_name(&unknown),
        "org.syncevolution.Exception.NoSuchServer"
    );
    take(&finished).unwrap();

    let (reports, done) = slot();
    fx.proxy.get_sync_reports("work", 1, done);
    fx.bus.run_until_idle();
    let reports = take(&reports).unwrap();
    assert_eq!(reports[0]["source-calendar-mode"], "refresh-from-server");
    assert!(!reports[0].contains_key("source-addressbook-mode"));
}

#[test]
fn test_second_sync_is_busy() {
    let fx = fixture();
    let (first, done) = slot();
    fx.proxy.start_sync("work", Vec::new(), done);
    let (second, done) = slot();
    fx.proxy.start_sync("ask", Vec::new(), done);
    let (unknown, done) = slot();
    fx.proxy.start_sync("nowhere", Vec::new(), done);
    let (bad_source, done) = slot();
    fx.proxy.start_sync(
        "work",
        vec![SourceSelection::new("todo", None)],
        done,
    );
    fx.bus.run_until_idle();

    take(&first).unwrap();
    assert_eq!(error_name(&second), "org.syncevolution.Exception.Busy");
    assert_eq!(error_name(&unknown), "org.syncevolution.Exception.Busy");
    assert_eq!(error_name(&bad_source), "org.syncevolution.Exception.Busy");

    // Once idle, the same requests fail for their own reasons
    let (unknown, done) = slot();
    fx.proxy.start_sync("nowhere", Vec::new(), done);
    let (bad_source, done) = slot();
    fx.proxy.start_sync(
        "work",
        vec![SourceSelection::new("todo", None)],
        done,
    );
    fx.bus.run_until_idle();
    assert_eq!(
        error_name(&unknown),
        "org.syncevolution.Exception.NoSuchServer"
    );
    assert_eq!(
        error_name(&bad_source),
        "org.syncevolution.Exception.InvalidConfig"
    );
}

#[test]
fn test_password_round_trip() {
    let fx = fixture();
    let requests: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = requests.clone();
    fx.proxy
        .on_need_password(move |server| sink.borrow_mut().push(server.to_string()))
        .unwrap();

    let (finished, done) = slot();
    fx.proxy.start_sync("ask", Vec::new(), done);
    fx.bus.run_until_idle();
    assert_eq!(*requests.borrow(), vec!["ask".to_string()]);
    assert!(finished.borrow().is_none());

    let (status, done) = slot();
    fx.proxy.get_status("ask", done);
    fx.bus.run_until_idle();
    assert_eq!(take(&status).unwrap().0, "waiting for password");

    let (accepted, done) = slot();
    fx.proxy.set_password("ask", "hunter2", done);
    fx.bus.run_until_idle();
    take(&accepted).unwrap();
    take(&finished).unwrap();
    assert_eq!(requests.borrow().len(), 1);

    let (late, done) = slot();
    fx.proxy.set_password("ask", "again", done);
    fx.bus.run_until_idle();
    assert_eq!(error_name(&late), "org.syncevolution.Exception.NotRunning");
}

#[test]
fn test_abort_sync() {
    let fx = fixture();
    let (finished, done) = slot();
    fx.proxy.start_sync("ask", Vec::new(), done);
    fx.bus.run_until_idle();

    let (aborted, done) = slot();
    fx.proxy.abort_sync("ask", done);
    let (not_running, done) = slot();
    fx.proxy.abort_sync("work", done);
    fx.bus.run_until_idle();

    take(&aborted).unwrap();
    assert_eq!(
        error_name(&not_running),
        "org.syncevolution.Exception.NotRunning"
    );
    assert_eq!(error_name(&finished), "org.syncevolution.Exception.Aborted");

    let (reports, done) = slot();
    fx.proxy.get_sync_reports("ask", 5, done);
    fx.bus.run_until_idle();
    assert_eq!(take(&reports).unwrap()[0]["status"], "aborted");
}

#[test]
fn test_client_disconnect_aborts_sync() {
    let fx = fixture();
    let other = fx.bus.connect();
    let other_proxy = SyncevoService::new(other.clone(), DBUS_NAME, DBUS_PATH).unwrap();
    let (finished, done) = slot::<()>();
    other_proxy.start_sync("ask", Vec::new(), done);
    fx.bus.run_until_idle();
    assert_eq!(fx.server.active_sync(), Some("ask".to_string()));

    other.close();
    fx.bus.run_until_idle();
    assert_eq!(fx.server.active_sync(), None);
    // The pending call of the closed connection failed locally
    assert!(take(&finished).is_err());

    let (reports, done) = slot();
    fx.proxy.get_sync_reports("ask", 5, done);
    fx.bus.run_until_idle();
    assert_eq!(take(&reports).unwrap()[0]["status"], "aborted");
    assert!(fx.client.is_open());
}

#[test]
fn test_removing_running_server_is_busy() {
    let fx = fixture();
    let (_finished, done) = slot::<()>();
    fx.proxy.start_sync("ask", Vec::new(), done);
    let (removed, done) = slot();
    fx.proxy.remove_server_config("ask", done);
    fx.bus.run_until_idle();
    assert_eq!(error_name(&removed), "org.syncevolution.Exception.Busy");
}
