use kv_service::{Config, Service};

fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let service = Service::start(config)?;
    let stop_flag = service.stop_flag();

    signal_hook::flag::register(signal_hook::consts::SIGINT, stop_flag)?;

    service.serve();

    // `serve` returns once the flag above is observed.
    service.shutdown()?;
    Ok(())
}
