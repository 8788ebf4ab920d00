use miette::Result;

pub fn init_tracing() -> Result<()> {
  use tracing_error::ErrorLayer;
  use tracing_subscriber::{prelude::*, EnvFilter};

  tracing_subscriber::registry()
    .with(EnvFilter::from_default_env())
    .with(ErrorLayer::default())
    .with(tracing_subscriber::fmt::layer().compact().with_file(false).with_line_number(true))
    .init();

  Ok(())
}
