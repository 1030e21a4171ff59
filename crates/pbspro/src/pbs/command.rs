use anyhow::Context;
use bstr::ByteSlice;
use std::process::{Command, Output};

use crate::pbs::parser::{PbsRecord, parse_key_value};

/// Messages PBS prints when the queried object does not exist.
const NOT_FOUND_MESSAGES: [&str; 3] = ["Unknown node", "Server has no node list", "No active"];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    NotFound(String),
    #[error("Exit code: {code}\nStderr: {stderr}\nStdout: {stdout}")]
    Failed {
        code: i32,
        stderr: String,
        stdout: String,
    },
    #[error("Could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::NotFound(_))
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Access to the PBS command line tools.
///
/// Every method returns the raw stdout. The provided methods layer parsing on top of them.
pub trait PbsCommand {
    fn qstat(&self, args: &[&str]) -> CommandResult<String>;

    /// Runs `qmgr -c "<args joined by spaces>"`.
    fn qmgr(&self, args: &[&str]) -> CommandResult<String>;

    fn pbsnodes(&self, args: &[&str]) -> CommandResult<String>;

    fn qmgr_parsed(&self, args: &[&str]) -> crate::Result<Vec<PbsRecord>> {
        parse_key_value(&self.qmgr(args)?)
    }

    fn pbsnodes_parsed(&self, args: &[&str]) -> crate::Result<Vec<PbsRecord>> {
        parse_key_value(&self.pbsnodes(args)?)
    }

    fn qstat_json(&self, args: &[&str]) -> crate::Result<serde_json::Value> {
        let mut arguments = Vec::with_capacity(args.len() + 2);
        if !args.contains(&"-F") {
            arguments.extend(["-F", "json"]);
        }
        arguments.extend_from_slice(args);
        let output = self.qstat(&arguments)?;
        Ok(decode_qstat_json(&output)?)
    }
}

/// `qstat -F json` is known to print invalid values such as `"pset":"group_id="""` and,
/// on some versions, a plain text header before the JSON document.
pub fn decode_qstat_json(output: &str) -> anyhow::Result<serde_json::Value> {
    let repaired = output.replace("\"\"\"", "\"");
    let mut rest = repaired.as_str();
    while let Some(start) = rest.find('{') {
        rest = &rest[start..];
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(error)) => log::debug!("Could not decode qstat output: {error}"),
            None => break,
        }
        rest = &rest[1..];
    }
    anyhow::bail!("Could not parse qstat json output: '{}'", output.trim())
}

/// Runs the PBS binaries found in `PATH`.
#[derive(Default)]
pub struct PbsCli;

impl PbsCli {
    fn run(&self, arguments: Vec<&str>) -> CommandResult<String> {
        log::debug!("Running PBS command `{}`", arguments.join(" "));
        let program = arguments[0];
        let output = create_command(&arguments)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let output = check_command_output(output)?;
        let stdout = output.stdout.to_str_lossy().into_owned();
        log::trace!("PBS {program} output\n{stdout}");
        Ok(stdout)
    }
}

impl PbsCommand for PbsCli {
    fn qstat(&self, args: &[&str]) -> CommandResult<String> {
        let mut arguments = vec!["qstat"];
        arguments.extend_from_slice(args);
        self.run(arguments)
    }

    fn qmgr(&self, args: &[&str]) -> CommandResult<String> {
        let command = args.join(" ");
        self.run(vec!["qmgr", "-c", &command])
    }

    fn pbsnodes(&self, args: &[&str]) -> CommandResult<String> {
        let mut arguments = vec!["pbsnodes"];
        arguments.extend_from_slice(args);
        match self.run(arguments) {
            Err(CommandError::NotFound(message)) if message.contains("Server has no node list") => {
                Ok(String::new())
            }
            result => result,
        }
    }
}

pub fn create_command(arguments: &[&str]) -> Command {
    let mut command = Command::new(arguments[0]);
    command.args(&arguments[1..]);
    command
}

pub fn check_command_output(output: Output) -> CommandResult<Output> {
    let status = output.status;
    if !status.success() {
        let stderr = output.stderr.to_str_lossy().trim().to_string();
        let stdout = output.stdout.to_str_lossy().trim().to_string();
        if let Some(message) = [&stderr, &stdout]
            .into_iter()
            .find(|text| NOT_FOUND_MESSAGES.iter().any(|m| text.contains(m)))
        {
            return Err(CommandError::NotFound(message.clone()));
        }
        return Err(CommandError::Failed {
            code: status.code().unwrap_or(-1),
            stderr,
            stdout,
        });
    }
    Ok(output)
}

/// Runs a command and returns its stdout, used for non PBS helpers.
pub fn run_program(arguments: &[&str], stdin: Option<&[u8]>) -> anyhow::Result<String> {
    use std::io::Write;
    use std::process::Stdio;

    log::debug!("Running command `{}`", arguments.join(" "));
    let mut command = create_command(arguments);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    let mut child = command
        .spawn()
        .with_context(|| format!("{} start failed", arguments[0]))?;
    let pipe = child.stdin.take();
    // stdin is fed while stdout and stderr are drained, a full pipe would stall either side
    let (written, output) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || match (stdin, pipe) {
            (Some(input), Some(mut pipe)) => pipe.write_all(input),
            _ => Ok(()),
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
        (written, output)
    });
    let output = output.with_context(|| format!("{} execution failed", arguments[0]))?;
    written.with_context(|| format!("Cannot write into {} stdin", arguments[0]))?;
    let output = check_command_output(output)
        .with_context(|| format!("{} execution failed", arguments[0]))?;
    Ok(output.stdout.to_str_lossy().into_owned())
}
