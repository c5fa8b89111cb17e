//! Queue command - shows admission queue occupancy.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use relay_client::RelayClient;

use super::Context;

/// Arguments for the queue command.
#[derive(Args, Debug)]
pub struct QueueArgs {}

/// Run the queue command.
pub async fn run(_args: QueueArgs, ctx: &Context) -> Result<()> {
    let client = RelayClient::builder().base_url(&ctx.server_url).build()?;

    let stats = match client.queue_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            if !ctx.json_output {
                let red = Style::new().red();
                eprintln!(
                    "{} cannot reach {}: {}",
                    red.apply_to("Error:"),
                    ctx.server_url,
                    e
                );
            }
            return Err(e.into());
        }
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Relay Admission Queue").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}/{}",
        dim.apply_to("Active:   "),
        stats.active,
        stats.max_concurrent
    );
    println!(
        "  {} {}/{}",
        dim.apply_to("Queued:   "),
        stats.queued,
        stats.max_queue_size
    );
    println!("  {} {}", dim.apply_to("Available:"), stats.available);
    println!("  {} {}", dim.apply_to("Server:   "), ctx.server_url);
    println!();

    Ok(())
}
