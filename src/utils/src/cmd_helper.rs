use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("exited with code: {code}, cmd: {cmd}, stderr: {stderr}")]
    Exit {
        cmd: String,
        code: i32,
        stderr: String,
    },
    #[error("process terminated by signal: {signal}, cmd: {cmd}")]
    Signal { cmd: String, signal: i32 },
    #[error("output of `{cmd}` is not utf8")]
    Utf8 { cmd: String },
}

pub fn get_command_str(cmd: &Command) -> String {
    let prog = cmd.get_program().to_string_lossy();
    std::iter::once(prog)
        .chain(cmd.get_args().map(|x| x.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` to completion and return its stdout.
///
/// A non-zero exit status is an error carrying the captured stderr.
pub fn get_command_output(mut cmd: Command) -> Result<String, CommandError> {
    let cmd_str = get_command_str(&cmd);
    log::debug!("executing command: {}", cmd_str);

    use std::os::unix::process::ExitStatusExt; // for status.signal()
    let result = cmd.output().map_err(|source| CommandError::Spawn {
        cmd: cmd_str.clone(),
        source,
    })?;

    if !result.status.success() {
        return match result.status.code() {
            Some(code) => Err(CommandError::Exit {
                cmd: cmd_str,
                code,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_owned(),
            }),
            None => Err(CommandError::Signal {
                cmd: cmd_str,
                signal: result.status.signal().unwrap_or(0),
            }),
        };
    }

    String::from_utf8(result.stdout).map_err(|_| CommandError::Utf8 { cmd: cmd_str })
}
