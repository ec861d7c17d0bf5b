pub struct ShutdownController {
    shutdown: tokio::sync::oneshot::Receiver<()>,
}

pub struct ShutdownSignal(tokio::sync::oneshot::Sender<()>);

impl ShutdownController {
    /// Creates a controller which reacts to sigint/sigterm from the OS.
    pub fn new_shutdown_on_signal() -> Self {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        tokio::spawn(Self::wait_for_signal(ShutdownSignal(sender)));
        Self { shutdown: receiver }
    }

    /// Creates a controller that can be manually instructed to shut the
    /// engine down. Used by tests.
    pub fn new_manual_shutdown() -> (ShutdownSignal, Self) {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        (ShutdownSignal(sender), Self { shutdown: receiver })
    }

    async fn wait_for_signal(shutdown: ShutdownSignal) {
        #[cfg(unix)]
        {
            use tokio::{signal, signal::unix};
            let mut sigterm = unix::signal(unix::SignalKind::terminate()).unwrap();
            let ctrl_c = signal::ctrl_c();
            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received SIGINT");
                },
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                },
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            tracing::info!("received SIGINT");
        }

        shutdown.shutdown();
    }

    /// Resolves once the shutdown signal has been received. Dropping the
    /// sender counts as a shutdown request too.
    pub async fn wait(self) {
        let _ = self.shutdown.await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new_shutdown_on_signal()
    }
}

impl ShutdownSignal {
    /// Send the shutdown signal to the associated controller.
    pub fn shutdown(self) {
        let _ = self.0.send(());
    }
}
