//! Introspection data
//!
//! Registered interfaces describe themselves with [`InterfaceInfo`]; the bus
//! renders the standard introspection XML from it.

use std::fmt::Write;

use crate::signal::SignalEntry;
use crate::signature::Signature;

/// Interface answering `Introspect` calls
pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\
\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

/// A method as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    /// One complete type per input argument
    pub in_args: Vec<Signature>,
    /// Return value (if any) followed by the output parameters
    pub out_args: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub methods: Vec<MethodInfo>,
    pub signals: Vec<SignalEntry>,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        InterfaceInfo {
            name: name.into(),
            methods: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    fn write_xml(&self, out: &mut String) {
        let _ = writeln!(out, "  <interface name=\"{}\">", self.name);
        for method in &self.methods {
            let _ = writeln!(out, "    <method name=\"{}\">", method.name);
            for arg in &method.in_args {
                let _ = writeln!(out, "      <arg type=\"{arg}\" direction=\"in\"/>");
            }
            for arg in &method.out_args {
                let _ = writeln!(out, "      <arg type=\"{arg}\" direction=\"out\"/>");
            }
            out.push_str("    </method>\n");
        }
        for signal in &self.signals {
            let _ = writeln!(out, "    <signal name=\"{}\">", signal.name);
            for arg in &signal.args {
                let _ = writeln!(out, "      <arg type=\"{arg}\"/>");
            }
            out.push_str("    </signal>\n");
        }
        out.push_str("  </interface>\n");
    }
}

fn introspectable() -> InterfaceInfo {
    InterfaceInfo {
        name: INTROSPECTABLE.to_string(),
        methods: vec![MethodInfo {
            name: "Introspect".to_string(),
            in_args: Vec::new(),
            out_args: vec![Signature::raw("s")],
        }],
        signals: Vec::new(),
    }
}

/// Renders the introspection document of one object path
///
/// `children` are the names of the direct child nodes (single path
/// elements). The introspectable interface itself is always listed.
pub fn node_xml(interfaces: &[InterfaceInfo], children: &[String]) -> String {
    let mut out = String::from(DOCTYPE);
    out.push_str("<node>\n");
    introspectable().write_xml(&mut out);
    for interface in interfaces {
        interface.write_xml(&mut out);
    }
    for child in children {
        let _ = writeln!(out, "  <node name=\"{child}\"/>");
    }
    out.push_str("</node>\n");
    out
}
