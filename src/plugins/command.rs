use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, error};
use validator::Validate;

use super::readfile::expand_home;
use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[validate(length(min = 1))]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    chdir: Option<String>,
    stdin: Option<String>,
    #[serde(default)]
    background: bool,
}

/// `command`: run a program
///
/// The outcome is `true` when it exits with status 0; the result holds
/// `rc`, `stdout` and `stderr`. With `background` the program is only
/// started and the outcome says whether that worked.
#[derive(Debug, Default)]
pub struct CommandPredicate {
    result: Option<Map<String, Value>>,
}

impl Predicate for CommandPredicate {
    fn name(&self) -> &str {
        "command"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1},
                "args": {"type": "array", "items": {"type": "string"}},
                "chdir": {"type": "string"},
                "stdin": {"type": "string"},
                "background": {"type": "boolean"},
            },
            "required": ["command"],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;
        debug!(command = %params.command, args = ?params.args, chdir = ?params.chdir, "Running command");

        let mut command = Command::new(expand_home(&params.command));
        command.args(&params.args);
        if let Some(dir) = params.chdir.as_deref().filter(|d| !d.is_empty()) {
            command.current_dir(expand_home(dir));
        }

        if params.background {
            command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
            return match command.spawn() {
                Ok(mut child) => {
                    std::thread::spawn(move || child.wait());
                    Ok(true)
                }
                Err(e) => {
                    error!(command = %params.command, error = %e, "Cannot start command");
                    Err(e.into())
                }
            };
        }

        let stdin = params.stdin.filter(|s| !s.is_empty());
        command
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| {
            error!(command = %params.command, error = %e, "Cannot run command");
            PluginError::from(e)
        })?;
        // Feed stdin from its own thread while the output is drained here.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(std::thread::spawn(move || pipe.write_all(input.as_bytes()))),
            _ => None,
        };
        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(())) => {}
                // The program may exit without reading all of its input.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(PluginError::failed("stdin writer panicked")),
            }
        }

        let Some(rc) = output.status.code() else {
            return Err(PluginError::failed(format!(
                "'{}' terminated by a signal",
                params.command
            )));
        };
        debug!(rc, "Command finished");

        let mut result = Map::new();
        result.insert("rc".to_string(), json!(rc));
        result.insert(
            "stdout".to_string(),
            json!(String::from_utf8_lossy(&output.stdout)),
        );
        result.insert(
            "stderr".to_string(),
            json!(String::from_utf8_lossy(&output.stderr)),
        );
        self.result = Some(result);
        Ok(rc == 0)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        self.result.clone()
    }
}
