//! Interpreter process management (startup and stdio).

use std::{path::PathBuf, process::Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// How to launch one interpreter run.
#[derive(Debug, Clone)]
pub struct InterpreterSpec {
    pub program: String,
    pub bootstrap: String,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
}

pub struct ProcessHandle {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `program -u -c <bootstrap>` with piped stdio and a cleared
/// environment. The child is killed when the handle is dropped.
pub fn start_python(spec: &InterpreterSpec) -> std::io::Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.program);
    cmd.arg("-u") // unbuffered
        .arg("-c")
        .arg(&spec.bootstrap)
        .current_dir(&spec.workdir)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let missing = |name: &str| std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("no {}", name));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    Ok(ProcessHandle { child, stdin, stdout, stderr })
}
