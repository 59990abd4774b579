//! Python executor: one sandboxed interpreter process per run, speaking a
//! single JSON request/reply over stdio.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{format_error_detail, Bindings, CodeExecutor, ExecutionResult, ExecutorConfig, ExecutorError, RawError};
use crate::artifacts::OutputDirs;
use crate::process::{start_python, InterpreterSpec, ProcessHandle};

const RESULT_MARKER: &str = "__ANALYST_RESULT__";
const STARTED_MARKER: &str = "__ANALYST_STARTED__";
const SCRATCH_DIR: &str = ".scratch";

const HARNESS: &str = r#"
import sys, os, io, json, traceback, contextlib

MARKER = "__ANALYST_RESULT__"
req = json.loads(sys.stdin.read())
code = req["code"]
allowed = [os.path.realpath(d) for d in req["allowed_dirs"]]
ns = {"__name__": "__main__"}

def _reply(payload):
    sys.__stdout__.write("\n" + MARKER + json.dumps(payload, default=str) + "\n")
    sys.__stdout__.flush()

try:
    import pandas as pd
    import numpy as np
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt
    ns.update(pd=pd, np=np, plt=plt)
except Exception as e:
    _reply({"fatal": "failed to import analysis libraries: %s" % e})
    sys.exit(0)
try:
    import plotly.express as px
    import plotly.graph_objects as go
    ns.update(px=px, go=go)
except Exception:
    pass

for name, b in req["bindings"].items():
    try:
        kind = b["kind"]
        if kind in ("json", "text"):
            ns[name] = b["value"]
        elif kind == "csv":
            ns[name] = pd.read_csv(b["path"])
        elif kind == "pickle":
            ns[name] = pd.read_pickle(b["path"])
    except Exception as e:
        _reply({"fatal": "failed to bind %s: %s" % (name, e)})
        sys.exit(0)

_WRITE_FLAGS = os.O_WRONLY | os.O_RDWR | os.O_APPEND | os.O_CREAT | os.O_TRUNC
_PATH_EVENTS = {"os.remove", "os.rename", "os.rmdir", "os.mkdir", "os.truncate", "os.chmod",
                "os.chown", "os.symlink", "os.link", "shutil.rmtree", "shutil.move", "shutil.copyfile"}
_BLOCKED = {"subprocess.Popen", "os.system", "os.exec", "os.posix_spawn", "os.spawn", "os.fork",
            "os.forkpty", "os.kill", "socket.connect"}

def _inside(p):
    if isinstance(p, int):
        return True
    try:
        r = os.path.realpath(os.fsdecode(p))
    except Exception:
        return False
    return any(r == a or r.startswith(a + os.sep) for a in allowed)

def _guard(event, args):
    if event == "open":
        path, mode, flags = args
        writing = (isinstance(mode, str) and any(c in mode for c in "wax+")) or \
                  (isinstance(flags, int) and bool(flags & _WRITE_FLAGS))
        if writing and not _inside(path):
            raise PermissionError("writing outside the output directories is not allowed: %s" % path)
    elif event in _PATH_EVENTS:
        for p in args:
            if isinstance(p, (str, bytes, os.PathLike)) and not _inside(p):
                raise PermissionError("%s outside the output directories is not allowed: %s" % (event, p))
    elif event in _BLOCKED:
        raise PermissionError("%s is not allowed during analysis" % event)

sys.addaudithook(_guard)

def _variables(before):
    out = {}
    for k, v in list(ns.items()):
        if k in before or k.startswith("_") or callable(v) or type(v).__name__ == "module":
            continue
        try:
            r = repr(v)
        except Exception:
            r = "<unrepresentable>"
        out[k] = r[:200]
        if len(out) >= 20:
            break
    return out

def _error(e):
    tb = traceback.extract_tb(e.__traceback__)
    lines = [f.lineno for f in tb if f.filename == "<analysis>"]
    if isinstance(e, SyntaxError) and e.filename == "<analysis>" and e.lineno:
        lines.append(e.lineno)
    return {"type": type(e).__name__, "message": str(e), "lines": lines,
            "traceback": "".join(traceback.format_exception(type(e), e, e.__traceback__))}

buf = io.StringIO()
before = set(ns)
sys.__stdout__.write("__ANALYST_STARTED__\n")
sys.__stdout__.flush()
try:
    compiled = compile(code, "<analysis>", "exec")
    with pd.option_context("display.max_rows", req["max_rows"], "display.max_columns", req["max_columns"]):
        with contextlib.redirect_stdout(buf):
            exec(compiled, ns)
    _reply({"output": buf.getvalue(), "variables": _variables(before)})
except SystemExit as e:
    if e.code in (None, 0):
        _reply({"output": buf.getvalue(), "variables": _variables(before)})
    else:
        _reply({"error": _error(e)})
except Exception as e:
    _reply({"error": _error(e)})
"#;

#[derive(Serialize)]
struct HarnessRequest<'a> {
    code: &'a str,
    bindings: &'a Bindings,
    allowed_dirs: Vec<String>,
    max_rows: usize,
    max_columns: usize,
}

#[derive(Debug, Deserialize)]
struct HarnessReply {
    output: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    error: Option<RawError>,
    fatal: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PythonExecutor {
    config: ExecutorConfig,
}

impl PythonExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn spec(&self, dirs: &OutputDirs) -> InterpreterSpec {
        let scratch = dirs.root.join(SCRATCH_DIR).to_string_lossy().into_owned();
        let mut env = vec![
            ("HOME".to_string(), scratch.clone()),
            ("TMPDIR".to_string(), scratch.clone()),
            ("MPLCONFIGDIR".to_string(), scratch),
            ("MPLBACKEND".to_string(), "Agg".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
        ];
        if let Ok(path) = std::env::var("PATH") {
            env.push(("PATH".to_string(), path));
        }
        InterpreterSpec {
            program: self.config.python_bin.clone(),
            bootstrap: HARNESS.to_string(),
            workdir: dirs.root.clone(),
            env,
        }
    }

    fn timeout_result(&self, code: &str) -> ExecutionResult {
        let err = RawError {
            kind: "TimeoutError".into(),
            message: format!("execution exceeded {} seconds", self.config.timeout.as_secs()),
            ..RawError::default()
        };
        ExecutionResult::error(format_error_detail(code, &err, self.config.max_traceback_length))
    }

    /// `exit_code` is `None` when the process was killed by a signal.
    fn interpret(
        &self,
        code: &str,
        stdout: &str,
        stderr: &str,
        exit_code: Option<i32>,
    ) -> Result<ExecutionResult, ExecutorError> {
        if !stdout.contains(RESULT_MARKER) && stdout.contains(STARTED_MARKER) {
            // The code itself took the interpreter down.
            let err = RawError {
                kind: "InterpreterExited".into(),
                message: match exit_code {
                    Some(c) => format!("interpreter exited with status {} before finishing", c),
                    None => "interpreter was killed by a signal before finishing".into(),
                },
                traceback: stderr_tail(stderr),
                ..RawError::default()
            };
            return Ok(ExecutionResult::error(format_error_detail(
                code,
                &err,
                self.config.max_traceback_length,
            )));
        }
        let reply = parse_reply(stdout, stderr)?;
        if let Some(fatal) = reply.fatal {
            return Err(ExecutorError::Protocol(fatal));
        }
        if let Some(err) = reply.error {
            return Ok(ExecutionResult::error(format_error_detail(
                code,
                &err,
                self.config.max_traceback_length,
            )));
        }
        match reply.output {
            Some(output) => {
                if !reply.variables.is_empty() {
                    debug!("variables after execution: {:?}", reply.variables);
                }
                Ok(ExecutionResult::Success { output, variables: reply.variables })
            }
            None => Err(ExecutorError::Protocol("reply carries neither output nor error".into())),
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let chars: Vec<char> = stderr.chars().collect();
    let start = chars.len().saturating_sub(2000);
    chars[start..].iter().collect::<String>().trim().to_string()
}

fn parse_reply(stdout: &str, stderr: &str) -> Result<HarnessReply, ExecutorError> {
    let Some(pos) = stdout.rfind(RESULT_MARKER) else {
        return Err(ExecutorError::Protocol(format!(
            "interpreter exited without a result: {}",
            stderr_tail(stderr)
        )));
    };
    let payload = stdout[pos + RESULT_MARKER.len()..].trim();
    serde_json::from_str(payload).map_err(|e| ExecutorError::Protocol(format!("unreadable reply: {}", e)))
}

#[async_trait]
impl CodeExecutor for PythonExecutor {
    async fn run(&self, code: &str, bindings: &Bindings, dirs: &OutputDirs) -> Result<ExecutionResult, ExecutorError> {
        let spec = self.spec(dirs);
        let scratch = dirs.root.join(SCRATCH_DIR);
        tokio::fs::create_dir_all(&scratch).await?;

        let mut allowed_dirs: Vec<String> = dirs
            .all()
            .iter()
            .map(|d| d.to_string_lossy().into_owned())
            .collect();
        allowed_dirs.push(scratch.to_string_lossy().into_owned());
        let request = HarnessRequest {
            code,
            bindings,
            allowed_dirs,
            max_rows: self.config.display_max_rows,
            max_columns: self.config.display_max_columns,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| ExecutorError::Protocol(e.to_string()))?;

        let ProcessHandle { mut child, mut stdin, mut stdout, mut stderr } =
            start_python(&spec).map_err(|source| ExecutorError::Spawn {
                bin: spec.program.clone(),
                source,
            })?;

        let io = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
            drop(stdin);
            let mut out = String::new();
            let mut err = String::new();
            let (o, e) = tokio::join!(stdout.read_to_string(&mut out), stderr.read_to_string(&mut err));
            o?;
            e?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let (out, err, status) = match tokio::time::timeout(self.config.timeout, io).await {
            Ok(res) => res?,
            Err(_) => return Ok(self.timeout_result(code)),
        };
        debug!("interpreter exited with {}", status);
        if !err.trim().is_empty() {
            debug!("interpreter stderr: {}", err.trim());
        }
        self.interpret(code, &out, &err, status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> PythonExecutor {
        PythonExecutor::new(ExecutorConfig::default())
    }

    #[test]
    fn success_reply_ignores_noise_before_marker() {
        let stdout = format!("stray\n{}{{\"output\": \"Total revenue: 1000000\\n\"}}\n", RESULT_MARKER);
        let res = executor().interpret("print(1)", &stdout, "", Some(0)).unwrap();
        assert_eq!(res.output(), Some("Total revenue: 1000000\n"));
    }

    #[test]
    fn error_reply_is_formatted() {
        let stdout = format!(
            "{}{{\"error\": {{\"type\": \"NameError\", \"message\": \"name 'x' is not defined\", \"lines\": [1], \"traceback\": \"tb\"}}}}",
            RESULT_MARKER
        );
        let res = executor().interpret("print(x)", &stdout, "", Some(0)).unwrap();
        let detail = res.error_detail().unwrap();
        assert!(detail.starts_with("  1: print(x)  <-- Error: NameError: name 'x' is not defined"));
        assert!(res.output().is_none());
    }

    #[test]
    fn missing_marker_is_a_protocol_error() {
        let err = executor().interpret("x", "", "ModuleNotFoundError: pandas", Some(1)).unwrap_err();
        assert!(matches!(err, ExecutorError::Protocol(ref m) if m.contains("pandas")));
    }

    #[test]
    fn fatal_reply_is_a_protocol_error() {
        let stdout = format!("{}{{\"fatal\": \"failed to bind df: no such file\"}}", RESULT_MARKER);
        let err = executor().interpret("x", &stdout, "", Some(0)).unwrap_err();
        assert!(matches!(err, ExecutorError::Protocol(_)));
    }

    #[test]
    fn hard_exit_after_start_is_an_execution_error() {
        let stdout = format!("{}\npartial\n", STARTED_MARKER);
        let res = executor()
            .interpret("import os\nos._exit(3)", &stdout, "Fatal Python error: Aborted", Some(3))
            .unwrap();
        let detail = res.error_detail().unwrap();
        assert!(detail.contains("InterpreterExited: interpreter exited with status 3"));
        assert!(detail.contains("Fatal Python error: Aborted"));

        let killed = executor().interpret("x", STARTED_MARKER, "", None).unwrap();
        assert!(killed.error_detail().unwrap().contains("killed by a signal"));
    }

    #[test]
    fn timeout_is_an_execution_error() {
        let res = executor().timeout_result("while True: pass");
        assert!(res.error_detail().unwrap().contains("TimeoutError: execution exceeded 120 seconds"));
    }
}
