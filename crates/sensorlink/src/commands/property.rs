//! `get`, `set` and `exec` handlers.

use serde::Serialize;
use serde_json::Value;

use sensorlink_core::Connection;

use crate::cli::{ExecArgs, GetArgs, GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct PropertyValue<'a> {
    path: &'a str,
    name: &'a str,
    value: Value,
}

pub async fn get(conn: &Connection, args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let raw = conn
        .read_property::<String>(&args.path, &args.name)
        .value()
        .await?;

    let result = PropertyValue {
        path: &args.path,
        name: &args.name,
        value: parse_arg(&raw),
    };
    let out = output::render_single(global.output, &result, |r| output::display_value(&r.value))?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn set(conn: &Connection, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let accepted = conn
        .property::<String>(&args.path, &args.name)
        .set(&args.value)
        .await?;
    if !accepted {
        return Err(CliError::Rejected {
            path: args.path,
            name: args.name,
        });
    }
    if !global.quiet {
        eprintln!("{}.{} = {}", args.path, args.name, args.value);
    }
    Ok(())
}

pub async fn exec(conn: &Connection, args: ExecArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let params: Vec<Value> = args.args.iter().map(String::as_str).map(parse_arg).collect();
    let raw = conn
        .command(&args.path, &args.command)
        .execute_raw(&params)
        .await?;

    let result = parse_arg(&raw);
    let out = output::render_single(global.output, &result, output::display_value)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// A command-line value as JSON: `42`, `true` and `[1,2]` keep their type,
/// anything that is not valid JSON becomes a string.
pub fn parse_arg(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_owned()))
}
