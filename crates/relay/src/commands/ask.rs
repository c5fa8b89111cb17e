//! Ask command - stream a prompt and print the answer as it arrives.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use console::Style;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use relay_client::{RelayClient, StreamObserver};
use relay_types::StreamRequest;

use super::Context;

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The prompt to send
    #[arg(required = true)]
    pub prompt: String,

    /// Fail instead of resuming a dropped stream
    #[arg(long)]
    pub no_reconnect: bool,

    /// Consecutive reconnect attempts before giving up (overrides config)
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Outcome for JSON output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskOutput {
    text: String,
    run_id: Option<String>,
    reconnects: u32,
}

/// Prints stream progress to the terminal.
struct TerminalObserver {
    quiet: bool,
    has_output: bool,
    dim: Style,
}

impl TerminalObserver {
    fn line_break(&mut self) {
        if self.has_output {
            println!();
            self.has_output = false;
        }
    }
}

impl StreamObserver for TerminalObserver {
    fn on_text_delta(&mut self, text: &str) {
        if self.quiet {
            return;
        }
        print!("{}", text);
        let _ = std::io::stdout().flush();
        self.has_output = true;
    }

    fn on_tool_call(&mut self, _tool_call_id: &str, tool_name: &str, _input: &Value) {
        if self.quiet {
            return;
        }
        self.line_break();
        println!("{}", self.dim.apply_to(format!("[Running: {}]", tool_name)));
    }

    fn on_tool_result(&mut self, _tool_call_id: &str, _tool_name: &str, _output: &Value, success: bool) {
        if self.quiet {
            return;
        }
        let status = if success { "done" } else { "failed" };
        println!("{}", self.dim.apply_to(format!("[{}]", status)));
    }

    fn on_error(&mut self, message: &str) {
        self.line_break();
        let red = Style::new().red();
        eprintln!("{} {}", red.apply_to("Error:"), message);
    }

    fn on_reconnect(&mut self, attempt: u32, run_id: &str) {
        if self.quiet {
            return;
        }
        self.line_break();
        eprintln!(
            "{}",
            self.dim
                .apply_to(format!("[connection lost, resuming {} (attempt {})]", run_id, attempt))
        );
    }

    fn on_run_restarted(&mut self, previous: &str, run_id: &str) {
        if self.quiet {
            return;
        }
        self.line_break();
        eprintln!(
            "{}",
            self.dim
                .apply_to(format!("[{} expired, restarted as {}]", previous, run_id))
        );
    }
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let client = RelayClient::builder().base_url(&ctx.server_url).build()?;
    let dim = Style::new().dim();

    let mut reconnect = ctx.loaded.config.reconnect_config();
    if args.no_reconnect {
        reconnect.enabled = false;
    }
    if let Some(max_attempts) = args.max_attempts {
        reconnect.max_attempts = max_attempts;
    }

    if ctx.verbose && !ctx.json_output {
        println!("{}", dim.apply_to(format!("Sending to: {}", ctx.server_url)));
        println!();
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut observer = TerminalObserver {
        quiet: ctx.json_output,
        has_output: false,
        dim,
    };
    let outcome = client
        .reconnecting(reconnect)
        .stream(&StreamRequest::new(args.prompt), &mut observer, &cancel)
        .await?;

    if ctx.json_output {
        let output = AskOutput {
            text: outcome.text,
            run_id: outcome.run_id,
            reconnects: outcome.reconnects,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        observer.line_break();
        if ctx.verbose && outcome.reconnects > 0 {
            println!(
                "{}",
                observer
                    .dim
                    .apply_to(format!("Completed after {} reconnect(s)", outcome.reconnects))
            );
        }
    }

    Ok(())
}
