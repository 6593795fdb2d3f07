use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Inicializa el logging con `tracing`.
///
/// `RUST_LOG` tiene prioridad; por defecto el crate loguea en `debug` y
/// serenity en `info`. Si ya había un subscriber instalado no hace nada.
pub fn init() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("guild_playback=debug".parse()?)
        .add_directive("serenity=info".parse()?);

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        debug!("Subscriber de tracing ya inicializado");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        assert!(super::init().is_ok());
        assert!(super::init().is_ok());
    }
}
