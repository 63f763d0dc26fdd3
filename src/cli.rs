use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "guestrun", about = "Run data-analysis snippets in an embedded Python runtime", version)]
#[command(group(ArgGroup::new("source").args(["snippet", "file", "code"]).multiple(false)))]
#[command(group(ArgGroup::new("format").args(["json", "output"]).multiple(false)))]
pub struct Cli {
    /// Run a built-in snippet by name (see --list-snippets).
    #[arg(short = 's', long)]
    pub snippet: Option<String>,

    /// Run the program in this file.
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Run this program text.
    #[arg(short = 'c', long)]
    pub code: Option<String>,

    /// Treat the program's result as a base64-encoded PNG.
    ///
    /// Built-in snippets declare this themselves.
    #[arg(long)]
    pub image: bool,

    /// Always stage the on-demand packages before running.
    #[arg(long = "on-demand")]
    pub on_demand: bool,

    /// Write an image result to this file instead of printing a data URI.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print the serialized result instead of rendering it.
    #[arg(long)]
    pub json: bool,

    /// List built-in snippets.
    #[arg(short = 'l', long = "list-snippets", visible_alias = "ls")]
    pub list_snippets: bool,

    /// Python interpreter to launch (overrides GUESTRUN_PYTHON).
    #[arg(long)]
    pub python: Option<String>,

    /// Execution timeout in seconds, 0 for none (overrides GUESTRUN_EXECUTION_TIMEOUT).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stage the on-demand packages right after load.
    #[arg(long)]
    pub prewarm: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
