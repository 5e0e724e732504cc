use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nodectl::{
    CommandSpec, Launcher, ProcessLauncher, PtyLauncher, RunConfig, Runner, Testbed, WallClock,
    parse_file,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nodectl",
    about = "Run a nodectl script against a device command console",
    version
)]
struct Args {
    /// Path to the script file
    #[arg(short, long)]
    script: String,

    /// Device program to launch; `{node}` in its arguments becomes the node id
    #[arg(short, long)]
    command: String,

    /// Node id of the device
    #[arg(short, long, default_value_t = 1)]
    node: u32,

    /// Attach over stdin/stdout pipes instead of a pseudo-terminal
    #[arg(long)]
    pipe: bool,

    /// The device does not echo commands back
    #[arg(long)]
    no_echo: bool,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Arguments to pass to the command
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let steps = parse_file(&args.script)
        .with_context(|| format!("Failed to parse script file: {}", args.script))?;

    let timeout = Duration::try_from_secs_f64(args.timeout).context("Invalid --timeout")?;
    let mut run = RunConfig::from_env();
    run.session = run
        .session
        .clone()
        .with_echo(!args.no_echo)
        .with_command_timeout(timeout);

    let spec = run.apply(CommandSpec::new(&args.command).args(&args.args));
    let launcher: Box<dyn Launcher> = if args.pipe {
        Box::new(ProcessLauncher::new(spec).with_stderr(run.verbose))
    } else {
        Box::new(PtyLauncher::new(spec))
    };

    let mut testbed = Testbed::new(run, Arc::new(WallClock::new())).with_first_id(args.node);
    let session = testbed
        .add_node(launcher.as_ref())
        .await
        .with_context(|| format!("Failed to start {}", launcher.describe()))?;

    let result = Runner::new(session)
        .execute(steps)
        .await
        .context("Failed to execute script");

    testbed.shutdown_all().await;
    result
}
