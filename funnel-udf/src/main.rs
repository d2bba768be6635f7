use anyhow::{Context, Result};
use envconfig::Envconfig;
use funnel_udf::cmd;
use funnel_udf::config::Config;
use rayon::ThreadPoolBuilder;

fn main() {
    // stdout carries results, so logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if let Err(e) = run() {
        eprintln!("Error: {e}");

        let mut causes = e.chain().skip(1).peekable();
        if causes.peek().is_some() {
            eprintln!("\nCaused by:");
            for (index, cause) in causes.enumerate() {
                eprintln!("    {index}: {cause}");
            }
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;

    ThreadPoolBuilder::new()
        .num_threads(config.eval_num_threads)
        .thread_name(|i| format!("funnel-eval-{i}"))
        .build_global()
        .context("failed to build the funnel evaluation thread pool")?;

    cmd::Cli::run(&config)
}
