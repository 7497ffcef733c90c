use crate::types::{EspaError, EspaResult};
use std::path::Path;
use std::process::Command;

/// An external program invocation assembled by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl std::fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Execute a command and return its combined stdout and stderr
///
/// A non-zero exit becomes `EspaError::Command` carrying the output.
pub fn run(cmd: &ExternalCommand, cwd: Option<&Path>) -> EspaResult<String> {
    log::info!("Executing [{}]", cmd);

    let mut process = Command::new(&cmd.program);
    process.args(&cmd.args);
    if let Some(dir) = cwd {
        process.current_dir(dir);
    }

    let result = process.output().map_err(|e| {
        EspaError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to start {}: {}", cmd.program, e),
        ))
    })?;

    let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&result.stderr));

    if !result.status.success() {
        return Err(EspaError::Command {
            command: cmd.to_string(),
            status: result.status.to_string(),
            output,
        });
    }

    if !output.trim().is_empty() {
        log::debug!("{}", output.trim_end());
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaces() {
        let cmd = ExternalCommand::new("gdalwarp")
            .arg("-t_srs")
            .arg("+proj=utm +zone=10")
            .args(["in.img", "out.img"]);
        assert_eq!(cmd.to_string(), "gdalwarp -t_srs \"+proj=utm +zone=10\" in.img out.img");
        assert!(cmd.has_arg("in.img"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_output() {
        let cmd = ExternalCommand::new("sh").args(["-c", "echo out; echo err 1>&2"]);
        let output = run(&cmd, None).unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_failure_keeps_output() {
        let cmd = ExternalCommand::new("sh").args(["-c", "echo broken input; exit 3"]);
        let err = run(&cmd, None).unwrap_err();
        assert!(matches!(err, EspaError::Command { .. }));
        assert!(err.output().unwrap().contains("broken input"));
    }

    #[test]
    fn test_run_missing_program() {
        let cmd = ExternalCommand::new("espa-no-such-program-xyz");
        assert!(matches!(run(&cmd, None), Err(EspaError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ExternalCommand::new("sh").args(["-c", "touch marker"]);
        run(&cmd, Some(dir.path())).unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
