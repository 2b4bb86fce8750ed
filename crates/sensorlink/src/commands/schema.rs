//! `describe` and `check` handlers.

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use sensorlink_core::schema::{self, ObjectRegistration, ObjectReport};
use sensorlink_core::{Connection, Description};

use crate::cli::{CheckArgs, DescribeArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Describe ─────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Tabled)]
struct MemberRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    signature: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Help")]
    help: String,
}

fn json_text(value: Option<&Value>) -> String {
    value.map(output::display_value).unwrap_or_default()
}

fn member_rows(description: &Description) -> Vec<MemberRow> {
    let properties = description.properties.iter().map(|(name, p)| MemberRow {
        kind: "property",
        name: name.clone(),
        signature: p.kind.clone().unwrap_or_default(),
        mode: p.mode.clone().unwrap_or_default(),
        help: p.help.clone().unwrap_or_default(),
    });
    let actions = description.actions.iter().map(|(name, a)| MemberRow {
        kind: "command",
        name: name.clone(),
        signature: match (json_text(a.args.as_ref()), json_text(a.returns.as_ref())) {
            (args, ret) if ret.is_empty() => args,
            (args, ret) => format!("{args} -> {ret}"),
        },
        mode: String::new(),
        help: a.help.clone().unwrap_or_default(),
    });
    let signals = description.signals.iter().map(|(name, s)| MemberRow {
        kind: "signal",
        name: name.clone(),
        signature: json_text(s.args.as_ref()),
        mode: String::new(),
        help: s.help.clone().unwrap_or_default(),
    });
    properties.chain(actions).chain(signals).collect()
}

pub async fn describe(
    conn: &Connection,
    args: DescribeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let description = conn.describe(&args.path).await?;

    let out = match global.output {
        OutputFormat::Json => output::render_json(&description, false)?,
        OutputFormat::JsonCompact => output::render_json(&description, true)?,
        other => output::render_list(
            other,
            &member_rows(&description),
            MemberRow::clone,
            |row| format!("{}\t{}", row.kind, row.name),
        )?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Check ────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Tabled)]
struct FindingRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Problem")]
    problem: &'static str,
}

/// Build a registration from `--property name[:rw]`, `--signal` and
/// `--command` flags.
pub fn registration_from_args(args: &CheckArgs) -> ObjectRegistration {
    let mut registration = ObjectRegistration::new(&args.path);
    for entry in &args.properties {
        registration = match entry.strip_suffix(":rw") {
            Some(name) => registration.with_property(name, true),
            None => registration.with_property(entry.trim_end_matches(":r"), false),
        };
    }
    for name in &args.signals {
        registration = registration.with_signal(name);
    }
    for name in &args.commands {
        registration = registration.with_command(name);
    }
    registration
}

fn finding_rows(report: &ObjectReport) -> Vec<FindingRow> {
    let groups: [(&'static str, &'static str, &Vec<String>); 7] = [
        ("property", "missing on device", &report.missing_properties),
        ("property", "read-only on device", &report.not_writable),
        ("signal", "missing on device", &report.missing_signals),
        ("command", "missing on device", &report.missing_commands),
        ("property", "not expected", &report.undeclared_properties),
        ("signal", "not expected", &report.undeclared_signals),
        ("command", "not expected", &report.undeclared_commands),
    ];
    groups
        .into_iter()
        .flat_map(|(kind, problem, names)| {
            names.iter().map(move |name| FindingRow {
                kind,
                name: name.clone(),
                problem,
            })
        })
        .collect()
}

pub async fn check(conn: &Connection, args: CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let registration = registration_from_args(&args);
    let reports = schema::check(conn.rest(), std::slice::from_ref(&registration)).await?;

    for report in &reports {
        let findings = finding_rows(report);
        let out = match global.output {
            OutputFormat::Json => output::render_json(report, false)?,
            OutputFormat::JsonCompact => output::render_json(report, true)?,
            OutputFormat::Table if findings.is_empty() => {
                format!("{}: all names match", report.path)
            }
            other => output::render_list(other, &findings, FindingRow::clone, |f| {
                format!("{}\t{}\t{}", f.kind, f.name, f.problem)
            })?,
        };
        output::print_output(&out, global.quiet);

        if !report.is_conformant() {
            return Err(CliError::NotConformant {
                path: report.path.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_flags_mark_writable() {
        let args = CheckArgs {
            path: "system/imu".into(),
            properties: vec!["rate:rw".into(), "model".into(), "serial:r".into()],
            signals: vec!["sample".into()],
            commands: vec![],
        };
        let reg = registration_from_args(&args);
        assert_eq!(reg.properties.len(), 3);
        assert!(reg.writable_properties.contains("rate"));
        assert!(!reg.writable_properties.contains("model"));
        assert!(reg.properties.contains("serial"));
        assert!(reg.signals.contains("sample"));
    }
}
