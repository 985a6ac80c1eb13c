use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: RUST_LOG wins, otherwise info everywhere
/// with debug for our own crates.
pub fn init(app_name: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(format!(
      "info,{app_name}=debug,{app_name}_import=debug,{app_name}_store=debug"
    ))
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_thread_names(true))
    .init();
}
