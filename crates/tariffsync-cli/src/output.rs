use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

/// Write `value` to stdout as a single JSON document.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let rendered = to_json(value, pretty)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(rendered)
}
