mod cli;

use std::io::{self, Read};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use guestrun::config::{self, Config};
use guestrun::printer::{self, ResultPrinter, TextPrinter};
use guestrun::{logging, snippets, ExecutionRequest, PackageTier, Session, TierRequirement};
use is_terminal::IsTerminal;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    if args.list_snippets {
        for s in snippets::BUILTIN {
            println!("{:<14} {}", s.name, s.description);
        }
        return Ok(());
    }

    logging::init_tracing();

    // Load config
    let cfg = Config::load();
    let mut harness = cfg.harness();
    if let Some(python) = &args.python {
        harness.location.program = python.clone();
    }
    if let Some(secs) = args.timeout {
        harness.execution_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    // Resolve the program: built-in, file, inline, stdin, else the default snippet
    let mut request = if let Some(name) = &args.snippet {
        match snippets::find(name) {
            Some(s) => s.request(),
            None => bail!("unknown snippet '{}' (try --list-snippets)", name),
        }
    } else if let Some(path) = &args.file {
        ExecutionRequest::new(config::read_snippet(path)?)
    } else if let Some(code) = &args.code {
        ExecutionRequest::new(code.clone())
    } else if !io::stdin().is_terminal() {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("reading program from stdin")?;
        ExecutionRequest::new(buf)
    } else {
        snippets::BUILTIN[0].request()
    };
    if args.image {
        request = request.expect_image();
    }
    if args.on_demand {
        request = request.tiers(TierRequirement::OnDemand);
    }

    let session = Session::new(cfg.python_launcher(), harness);

    printer::status("Loading guest runtime...");
    session.load().await?;

    if args.prewarm {
        printer::status("Staging on-demand packages...");
        session.stage(PackageTier::OnDemand).await?;
    }

    printer::status("Running...");
    let result = session.execute(request).await?;

    let printer = ResultPrinter {
        text: TextPrinter { color: cfg.get("DEFAULT_COLOR") },
        output: args.output.as_deref(),
        json: args.json,
    };
    if !printer.print(&result)? {
        std::process::exit(1);
    }
    Ok(())
}
