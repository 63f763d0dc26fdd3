//! Interpreter process management (startup/IO).

use anyhow::{anyhow, Context, Result};
use tokio::io::{BufReader, Lines};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;

pub mod python;

/// A running interpreter process with a line-oriented request/reply channel.
///
/// Both `send_line` and `next_line` are cancel safe: a dropped call never
/// leaves half a line on either pipe.
pub struct ProcessHandle {
    pub child: Child,
    requests: mpsc::Sender<String>,
    replies: Lines<BufReader<ChildStdout>>,
}

impl ProcessHandle {
    pub async fn send_line(&self, line: String) -> Result<()> {
        self.requests
            .send(line)
            .await
            .map_err(|_| anyhow!("interpreter stdin is closed"))
    }

    /// Next line from the interpreter's stdout, `None` once it exited.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.replies.next_line().await.context("reading interpreter stdout")
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.child.id()).finish_non_exhaustive()
    }
}
