//! Python guest engine: NDJSON request/reply protocol over a long-lived interpreter process.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::process::{python::start_python, ProcessHandle};
use crate::runtime::{EngineLauncher, EngineLocation, GuestEngine, GuestFault, GuestValue};

/// Interpreter-side half of the protocol.
///
/// Runs the source as a whole program and reports the trailing expression
/// separately. Guest prints are captured per request; fd 1 is pointed at
/// stderr so subprocesses (pip) can't write into the reply channel. Requests
/// arrive on a private copy of fd 0, and the guest sees an empty stdin.
/// Strings are re-encoded with `backslashreplace` so lone surrogates still
/// produce valid UTF-8 JSON.
pub const BOOTSTRAP: &str = r##"
import ast, asyncio, contextlib, importlib, importlib.util, inspect, io, json, os, subprocess, sys, textwrap, traceback

_proto = os.fdopen(os.dup(1), "w", encoding="utf-8")
os.dup2(2, 1)
_requests = os.fdopen(os.dup(0), "r", encoding="utf-8")
_null = os.open(os.devnull, os.O_RDONLY)
os.dup2(_null, 0)
os.close(_null)
_scope = {"__name__": "__main__", "__builtins__": __builtins__}
_flags = getattr(ast, "PyCF_ALLOW_TOP_LEVEL_AWAIT", 0)

def _clean(value):
    if isinstance(value, str):
        return value.encode("utf-8", "backslashreplace").decode("utf-8")
    if isinstance(value, dict):
        return {key: _clean(item) for key, item in value.items()}
    return value

def _reply(message):
    _proto.write(json.dumps(_clean(message)) + "\n")
    _proto.flush()

def _evaluate(node, mode):
    code = compile(node, "<snippet>", mode, flags=_flags)
    result = eval(code, _scope)
    if code.co_flags & inspect.CO_COROUTINE:
        result = asyncio.run(result)
    return result

def _run(source):
    tree = ast.parse(textwrap.dedent(source), "<snippet>", "exec")
    tail = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        tail = ast.Expression(tree.body.pop().value)
    _evaluate(tree, "exec")
    value = _evaluate(tail, "eval") if tail is not None else None
    if value is None:
        return {"type": "none"}
    if isinstance(value, str):
        return {"type": "str", "value": value}
    return {"type": "repr", "value": repr(value)}

def _install(package, module, pip):
    if importlib.util.find_spec(module) is None:
        if not pip:
            raise ModuleNotFoundError("No module named '%s'" % module)
        subprocess.check_call([sys.executable, "-m", "pip", "install", "--quiet", package])
        importlib.invalidate_caches()
    importlib.import_module(module)

def _describe(exc):
    return "".join(traceback.format_exception_only(type(exc), exc)).strip() or type(exc).__name__

_reply({"id": 0, "ok": True, "value": {"type": "str", "value": sys.version.split()[0]}})

for _line in _requests:
    if not _line.strip():
        continue
    try:
        _request = json.loads(_line)
    except ValueError:
        continue
    _captured = io.StringIO()
    try:
        with contextlib.redirect_stdout(_captured):
            if _request["op"] == "install":
                _install(_request["package"], _request["module"], _request.get("pip", False))
                _value = None
            else:
                _value = _run(_request["source"])
        _reply({"id": _request["id"], "ok": True, "value": _value, "stdout": _captured.getvalue()})
    except BaseException as exc:
        _reply({"id": _request["id"], "ok": False, "error": _describe(exc), "stdout": _captured.getvalue()})
"##;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Install { id: u64, package: &'a str, module: &'a str, pip: bool },
    Run { id: u64, source: &'a str },
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Option<GuestValue>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stdout: String,
}

fn parse_reply(line: &str) -> Result<Reply> {
    serde_json::from_str(line).context("malformed reply from guest runtime")
}

/// Wait for the reply to request `id`, skipping replies to abandoned requests.
///
/// The reply channel carries nothing but protocol lines, so a line that does
/// not decode fails the pending request instead of being skipped.
async fn read_reply(process: &mut ProcessHandle, id: u64) -> Result<Reply> {
    loop {
        let line = process
            .next_line()
            .await?
            .ok_or_else(|| anyhow!("guest runtime exited"))?;
        let reply = match parse_reply(&line) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(target: "guestrun::guest", %line, waiting = id, "undecodable reply line");
                return Err(err);
            }
        };
        if !reply.stdout.is_empty() {
            debug!(target: "guestrun::guest", id = reply.id, stdout = %reply.stdout, "captured guest output");
        }
        if reply.id < id {
            debug!(target: "guestrun::guest", stale = reply.id, waiting = id, "dropping late reply");
            continue;
        }
        return Ok(reply);
    }
}

#[derive(Debug, Clone)]
pub struct PythonLauncher {
    /// Fall back to `pip install` when a package is not importable.
    pub pip_install: bool,
    pub startup_timeout: Duration,
}

impl Default for PythonLauncher {
    fn default() -> Self {
        Self { pip_install: false, startup_timeout: STARTUP_TIMEOUT }
    }
}

#[async_trait]
impl EngineLauncher for PythonLauncher {
    type Engine = PythonEngine;

    async fn launch(&self, location: &EngineLocation) -> Result<PythonEngine> {
        let mut process = start_python(location, BOOTSTRAP)
            .await
            .with_context(|| format!("failed to start interpreter '{}'", location.program))?;

        let hello = tokio::time::timeout(self.startup_timeout, read_reply(&mut process, 0))
            .await
            .map_err(|_| anyhow!("guest runtime did not report ready within {:?}", self.startup_timeout))?
            .context("guest runtime failed during startup")?;
        let version = match hello.value {
            Some(GuestValue::Str(v)) if hello.ok => v,
            _ => bail!("unexpected startup handshake from guest runtime"),
        };
        info!(target: "guestrun::guest", pid = ?process.id(), %version, "python guest runtime ready");

        Ok(PythonEngine { process, next_id: 0, pip_install: self.pip_install, version })
    }
}

#[derive(Debug)]
pub struct PythonEngine {
    process: ProcessHandle,
    next_id: u64,
    pip_install: bool,
    version: String,
}

impl PythonEngine {
    pub fn version(&self) -> &str {
        &self.version
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn roundtrip(&mut self, id: u64, request: &Request<'_>) -> Result<Reply> {
        let line = serde_json::to_string(request)?;
        self.process.send_line(line).await?;
        read_reply(&mut self.process, id).await
    }
}

#[async_trait]
impl GuestEngine for PythonEngine {
    async fn install(&mut self, package: &str, module: &str) -> Result<()> {
        let id = self.allocate_id();
        let request = Request::Install { id, package, module, pip: self.pip_install };
        let reply = self.roundtrip(id, &request).await?;
        if !reply.ok {
            bail!("{}", reply.error.unwrap_or_else(|| "install failed".to_string()));
        }
        Ok(())
    }

    async fn run(&mut self, source: &str) -> Result<GuestValue, GuestFault> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, &Request::Run { id, source }).await?;
        if reply.ok {
            Ok(reply.value.unwrap_or(GuestValue::None))
        } else {
            Err(GuestFault::new(
                reply.error.unwrap_or_else(|| "guest program failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_by_op() {
        let line = serde_json::to_string(&Request::Run { id: 3, source: "1 + 1" }).unwrap();
        assert_eq!(line, r#"{"op":"run","id":3,"source":"1 + 1"}"#);
        let line = serde_json::to_string(&Request::Install {
            id: 4,
            package: "scikit-learn",
            module: "sklearn",
            pip: false,
        })
        .unwrap();
        assert!(line.starts_with(r#"{"op":"install","id":4"#));
    }

    #[test]
    fn replies_decode_tagged_values() {
        let reply: Reply =
            serde_json::from_str(r#"{"id":1,"ok":true,"value":{"type":"str","value":"hi"},"stdout":""}"#).unwrap();
        assert_eq!(reply.value, Some(GuestValue::Str("hi".into())));
        let reply: Reply = serde_json::from_str(r#"{"id":2,"ok":true,"value":{"type":"none"}}"#).unwrap();
        assert_eq!(reply.value, Some(GuestValue::None));
        let reply: Reply =
            serde_json::from_str(r#"{"id":3,"ok":false,"error":"NameError: name 'x' is not defined"}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.value, None);
    }

    #[test]
    fn undecodable_reply_is_an_error() {
        // serde_json refuses a lone surrogate escape
        let err = parse_reply(r#"{"id":1,"ok":true,"value":{"type":"str","value":"\ud800"}}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("malformed reply from guest runtime"));
        assert!(parse_reply("Traceback (most recent call last):").is_err());
    }

    #[tokio::test]
    async fn missing_interpreter_fails_to_launch() {
        let location = EngineLocation::new("/nonexistent/guestrun-python");
        let err = PythonLauncher::default().launch(&location).await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed to start interpreter"));
    }
}
