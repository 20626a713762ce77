//! # Module Interface
//!
//! Long-running units that an application supervisor starts in order and
//! stops on shutdown. Gates are modules; game logic modules usually are too.
//!
//! A supervisor calls [`Module::on_init`], then drives [`Module::run`] on its
//! own task until the close signal fires, then calls [`Module::on_destroy`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::NetworkConfig;
use crate::error::Result;

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Reported by the supervisor when listing modules
    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn on_init(&self) {}

    /// Run until `close_sig` is cancelled, then release everything started.
    async fn run(&self, close_sig: CancellationToken) -> Result<()>;

    /// Apply a new configuration while running. Modules that cannot do so
    /// keep the default, which ignores it.
    fn reload(&self, _config: &NetworkConfig) -> Result<()> {
        Ok(())
    }

    fn on_destroy(&self) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Ticker {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Module for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }

        async fn run(&self, close_sig: CancellationToken) -> Result<()> {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(5));
            loop {
                tokio::select! {
                    _ = close_sig.cancelled() => return Ok(()),
                    _ = interval.tick() => {
                        self.ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let module = Arc::new(Ticker::default());
        let close_sig = CancellationToken::new();

        let task = {
            let module = module.clone();
            let close_sig = close_sig.clone();
            tokio::spawn(async move { module.run(close_sig).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        close_sig.cancel();
        task.await.unwrap().unwrap();

        assert!(module.ticks.load(Ordering::SeqCst) > 0);
        assert_eq!(module.version(), env!("CARGO_PKG_VERSION"));
        assert!(module.reload(&NetworkConfig::default()).is_ok());
    }
}
