use {
    anyhow::{Context, Result},
    derive_more::Display,
    tokio::signal::ctrl_c,
};

#[derive(Debug, Display)]
pub enum ShutdownSignal {
    #[display("SIGINT")]
    Sigint,
    #[display("SIGTERM")]
    Sigterm,
}

/// Waits until the process is asked to stop.
pub async fn shutdown_signal() -> Result<ShutdownSignal> {
    #[cfg(target_family = "unix")]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install sigterm signal handler")?;
        tokio::select! {
            result = ctrl_c() => {
                result.context("failed to install sigint signal handler")?;
                Ok(ShutdownSignal::Sigint)
            }
            _ = sigterm.recv() => Ok(ShutdownSignal::Sigterm),
        }
    }

    #[cfg(not(target_family = "unix"))]
    {
        ctrl_c()
            .await
            .context("failed to install sigint signal handler")?;
        Ok(ShutdownSignal::Sigint)
    }
}
