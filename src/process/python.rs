//! Python interpreter process bootstrap and I/O glue.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ProcessHandle;
use crate::runtime::EngineLocation;

const REQUEST_QUEUE: usize = 16;

pub async fn start_python(location: &EngineLocation, bootstrap: &str) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&location.program);
    cmd.args(&location.args)
        .arg("-u") // unbuffered
        .arg("-c")
        .arg(bootstrap)
        .env("MPLBACKEND", "Agg")
        .kill_on_drop(true)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some(dir) = &location.working_dir {
        cmd.current_dir(dir);
    }

    let mut child: Child = cmd.spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("no stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("no stderr"))?;

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "guestrun::guest", "{}", line);
        }
    });

    let (requests, mut queue) = mpsc::channel::<String>(REQUEST_QUEUE);
    tokio::spawn(async move {
        while let Some(mut line) = queue.recv().await {
            line.push('\n');
            if let Err(err) = stdin.write_all(line.as_bytes()).await {
                warn!(target: "guestrun::guest", error = %err, "interpreter stdin closed");
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });

    Ok(ProcessHandle {
        child,
        requests,
        replies: BufReader::new(stdout).lines(),
    })
}
