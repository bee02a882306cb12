use tracing_subscriber::{filter::Directive, EnvFilter};

/// Install the global fmt subscriber. `RUST_LOG` directives are honored; the
/// service's own events default to `info`.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "water_service=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
