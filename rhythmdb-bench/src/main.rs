mod args;
mod bench;
mod check;
mod trace;

use args::{App, Commands};
use clap::Parser;
use miette::Result;
use trace::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
  init_tracing()?;
  let args = App::parse();

  match &args.command {
    Commands::Bench(bench_args) => bench::run(bench_args).await,
    Commands::Check(check_args) => check::run(check_args).await,
  }
}
