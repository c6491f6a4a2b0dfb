use clap::Parser;
use lanes_core::Lane;

/// Run a demo workload on the lane scheduler and print its stats.
///
/// Tasks are spread across all five lanes unless `--lane` pins them to one.
/// The report and per-lane stats are printed as JSON on stdout; logs go to
/// stderr (set `RUST_LOG=lanes_scheduler=debug` to watch every flush).
#[derive(Parser, Debug)]
#[command(name = "lanes", about = "Cooperative priority-lane task scheduler demo")]
pub struct CliArgs {
    /// Path to a TOML config file (default: ~/.config/lanes/config.toml if present)
    #[arg(long)]
    pub config: Option<String>,

    /// Queue every task on this lane: microTask, render, macroTask, postRender, or idle
    #[arg(long)]
    pub lane: Option<Lane>,

    /// Number of one-shot tasks to queue
    #[arg(long, default_value = "20")]
    pub tasks: usize,

    /// Delay applied to every one-shot task, in milliseconds
    #[arg(long, default_value = "0")]
    pub delay_ms: u64,

    /// Every Nth task defers its result to the runtime (0 disables)
    #[arg(long, default_value = "4")]
    pub defer_every: usize,

    /// Every Nth task fails (0 disables)
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// Runs of the persistent idle task before it is canceled (0 disables)
    #[arg(long, default_value = "3")]
    pub persistent_runs: u64,

    /// Print the resolved config and exit
    #[arg(long)]
    pub print_config: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,
}
