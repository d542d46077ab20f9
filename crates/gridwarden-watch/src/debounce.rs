//! Single-timer debounce.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A timer that every [`touch`](Debouncer::touch) pushes back by the
/// full window. [`fired`](Debouncer::fired) resolves once the window
/// passes without a touch, then the debouncer disarms until touched again.
pub struct Debouncer {
    window: Duration,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Debouncer {
    /// Must be called inside a tokio runtime.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sleep: Box::pin(tokio::time::sleep(window)),
            armed: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the timer, or re-arm it if it is already running.
    pub fn touch(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.window);
        self.armed = true;
    }

    /// Wait for the armed timer to expire. Never resolves while disarmed.
    ///
    /// Cancel safe: dropping the future leaves the timer armed.
    pub async fn fired(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn disarmed_never_fires() {
        let mut d = Debouncer::new(Duration::from_secs(1));
        assert!(timeout(Duration::from_secs(60), d.fired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_pushes_expiry_back() {
        let mut d = Debouncer::new(Duration::from_secs(10));
        let started = Instant::now();

        d.touch();
        assert!(timeout(Duration::from_secs(6), d.fired()).await.is_err());
        d.touch();
        assert!(timeout(Duration::from_secs(6), d.fired()).await.is_err());
        d.fired().await;

        assert!(started.elapsed() >= Duration::from_secs(16));
        assert!(!d.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_arming() {
        let mut d = Debouncer::new(Duration::from_millis(500));
        d.touch();
        d.fired().await;
        assert!(timeout(Duration::from_secs(5), d.fired()).await.is_err());
        d.touch();
        assert!(timeout(Duration::from_secs(1), d.fired()).await.is_ok());
    }
}
