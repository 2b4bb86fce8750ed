// ── Schema conformance ──
//
// Compares what the client has registered for an object path (properties,
// signals, commands) with the device's self-description. Registration is
// recorded explicitly by `Connection` whenever a binding is created; the
// CLI can also build `ObjectRegistration`s by hand.

use std::collections::BTreeSet;

use dashmap::DashMap;
use sensorlink_api::{Description, RestClient};
use serde::Serialize;
use tracing::debug;

use crate::error::CoreError;

/// Names registered locally for one object path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectRegistration {
    pub path: String,
    pub properties: BTreeSet<String>,
    /// Subset of `properties` the client intends to write.
    pub writable_properties: BTreeSet<String>,
    pub signals: BTreeSet<String>,
    pub commands: BTreeSet<String>,
}

impl ObjectRegistration {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, writable: bool) -> Self {
        let name = name.into();
        if writable {
            self.writable_properties.insert(name.clone());
        }
        self.properties.insert(name);
        self
    }

    pub fn with_signal(mut self, name: impl Into<String>) -> Self {
        self.signals.insert(name.into());
        self
    }

    pub fn with_command(mut self, name: impl Into<String>) -> Self {
        self.commands.insert(name.into());
        self
    }
}

/// Introspection registry: object path -> registered names.
#[derive(Debug, Default)]
pub struct Registrations {
    objects: DashMap<String, ObjectRegistration>,
}

impl Registrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_property(&self, path: &str, name: &str, writable: bool) {
        let mut entry = self.entry(path);
        entry.properties.insert(name.to_owned());
        if writable {
            entry.writable_properties.insert(name.to_owned());
        }
    }

    pub fn note_signal(&self, path: &str, name: &str) {
        self.entry(path).signals.insert(name.to_owned());
    }

    pub fn note_command(&self, path: &str, name: &str) {
        self.entry(path).commands.insert(name.to_owned());
    }

    /// All registrations, sorted by path.
    pub fn snapshot(&self) -> Vec<ObjectRegistration> {
        let mut objects: Vec<ObjectRegistration> =
            self.objects.iter().map(|e| e.value().clone()).collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn entry(&self, path: &str) -> dashmap::mapref::one::RefMut<'_, String, ObjectRegistration> {
        self.objects
            .entry(path.to_owned())
            .or_insert_with(|| ObjectRegistration::new(path))
    }
}

/// Differences between a registration and the device's description.
///
/// `missing_*`: registered locally, absent on the device.
/// `undeclared_*`: offered by the device, not registered locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectReport {
    pub path: String,
    pub missing_properties: Vec<String>,
    pub undeclared_properties: Vec<String>,
    /// Registered as writable but read-only on the device.
    pub not_writable: Vec<String>,
    pub missing_signals: Vec<String>,
    pub undeclared_signals: Vec<String>,
    pub missing_commands: Vec<String>,
    pub undeclared_commands: Vec<String>,
}

impl ObjectReport {
    /// Nothing registered is missing or mis-typed on the device.
    ///
    /// Undeclared device names do not count against conformance.
    pub fn is_conformant(&self) -> bool {
        self.missing_properties.is_empty()
            && self.not_writable.is_empty()
            && self.missing_signals.is_empty()
            && self.missing_commands.is_empty()
    }
}

fn diff<'r>(
    local: &BTreeSet<String>,
    remote: impl Iterator<Item = &'r String>,
) -> (Vec<String>, Vec<String>) {
    let remote: BTreeSet<&String> = remote.collect();
    let missing = local
        .iter()
        .filter(|n| !remote.contains(n))
        .cloned()
        .collect();
    let undeclared = remote
        .into_iter()
        .filter(|n| !local.contains(*n))
        .cloned()
        .collect();
    (missing, undeclared)
}

/// Compare one registration against a description.
pub fn compare(registration: &ObjectRegistration, description: &Description) -> ObjectReport {
    let (missing_properties, undeclared_properties) =
        diff(&registration.properties, description.properties.keys());
    let (missing_signals, undeclared_signals) =
        diff(&registration.signals, description.signals.keys());
    let (missing_commands, undeclared_commands) =
        diff(&registration.commands, description.actions.keys());

    let not_writable = registration
        .writable_properties
        .iter()
        .filter(|name| {
            description
                .properties
                .get(*name)
                .is_some_and(|p| !p.is_writable())
        })
        .cloned()
        .collect();

    ObjectReport {
        path: registration.path.clone(),
        missing_properties,
        undeclared_properties,
        not_writable,
        missing_signals,
        undeclared_signals,
        missing_commands,
        undeclared_commands,
    }
}

/// Fetch the description of every registered object and compare.
pub async fn check(
    rest: &RestClient,
    objects: &[ObjectRegistration],
) -> Result<Vec<ObjectReport>, CoreError> {
    let mut reports = Vec::with_capacity(objects.len());
    for object in objects {
        debug!(path = %object.path, "checking object against device description");
        let description = rest.describe(&object.path).await?;
        reports.push(compare(object, &description));
    }
    Ok(reports)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn battery_description() -> Description {
        serde_json::from_value(json!({
            "properties": {
                "level": { "type": "int", "mode": "r" },
                "label": { "type": "string", "mode": "rw" },
                "health": { "type": "int", "mode": "r" }
            },
            "actions": { "calibrate": {} },
            "signals": { "changed": {} }
        }))
        .unwrap()
    }

    #[test]
    fn conformant_registration() {
        let reg = ObjectRegistration::new("system/battery")
            .with_property("level", false)
            .with_property("label", true)
            .with_signal("changed")
            .with_command("calibrate");

        let report = compare(&reg, &battery_description());
        assert!(report.is_conformant());
        assert_eq!(report.undeclared_properties, vec!["health".to_owned()]);
    }

    #[test]
    fn reports_missing_and_read_only() {
        let reg = ObjectRegistration::new("system/battery")
            .with_property("level", true)
            .with_property("voltage", false)
            .with_signal("low")
            .with_command("reset");

        let report = compare(&reg, &battery_description());
        assert!(!report.is_conformant());
        assert_eq!(
            report,
            ObjectReport {
                path: "system/battery".into(),
                missing_properties: vec!["voltage".into()],
                undeclared_properties: vec!["health".into(), "label".into()],
                not_writable: vec!["level".into()],
                missing_signals: vec!["low".into()],
                undeclared_signals: vec!["changed".into()],
                missing_commands: vec!["reset".into()],
                undeclared_commands: vec!["calibrate".into()],
            }
        );
    }

    #[test]
    fn registrations_merge_by_path() {
        let regs = Registrations::new();
        regs.note_property("imu", "rate", true);
        regs.note_signal("imu", "changed");
        regs.note_command("recorder", "start");
        regs.note_property("imu", "rate", false);

        let snapshot = regs.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, "imu");
        assert!(snapshot[0].writable_properties.contains("rate"));
        assert!(snapshot[0].signals.contains("changed"));
        assert_eq!(snapshot[1].path, "recorder");
    }
}
