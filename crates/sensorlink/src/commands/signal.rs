//! `watch` handler: subscribe to a signal and stream its events.

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use sensorlink_core::{Connection, ConnectionState};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn watch(conn: &Connection, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    conn.connect().await?;
    let mut reconnects = conn.reconnects();
    let mut states = conn.state_changes();

    let signal = conn.signal(&args.path, &args.signal, |fields: &[Value]| Ok(fields.to_vec()))?;
    let mut events = signal.subscribe();
    signal.wait_active().await?;
    if !global.quiet {
        eprintln!("watching {} (Ctrl-C to stop)", signal.path());
    }

    let mut seen = 0usize;
    while args.count.is_none_or(|limit| seen < limit) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = states.wait_for(|s| *s == ConnectionState::Disconnected) => {
                return Err(CliError::ConnectionFailed {
                    address: conn.config().address.clone(),
                    reason: "socket lost and reconnection gave up".into(),
                });
            }
            reconnected = reconnects.recv() => match reconnected {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    tracing::info!(signal = %signal.path(), "socket replaced, resubscribing");
                    signal.resubscribe();
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Some(fields) => {
                    seen += 1;
                    output::print_output(&render_event(global.output, &fields)?, global.quiet);
                }
                None => break,
            },
        }
    }

    events.close().await?;
    conn.disconnect().await;
    Ok(())
}

/// One output line per event: `timestamp<TAB>field...` or a JSON array.
fn render_event(format: OutputFormat, fields: &[Value]) -> Result<String, CliError> {
    match format {
        OutputFormat::Table | OutputFormat::Plain => Ok(fields
            .iter()
            .map(output::display_value)
            .collect::<Vec<_>>()
            .join("\t")),
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(fields, true),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_render_one_line() {
        let fields = [json!(12.5), json!("left"), json!(3)];
        assert_eq!(render_event(OutputFormat::Plain, &fields).unwrap(), "12.5\tleft\t3");
        assert_eq!(
            render_event(OutputFormat::Json, &fields).unwrap(),
            r#"[12.5,"left",3]"#
        );
    }
}
