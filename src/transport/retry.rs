use crate::transport::runtime::sleep_with_shutdown;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential reconnect policy for long-lived broker connections.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.clamp(1.1, 10.0),
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[async_trait]
pub trait RetryContext {
    type Item;
    type Error;

    async fn poll(&mut self) -> Result<Option<Self::Item>, Self::Error>;
    async fn handle_item(&mut self, item: Self::Item);
    async fn report_error(&mut self, error: &Self::Error, delay: Duration);
}

pub async fn run_retry_loop<C>(
    shutdown: CancellationToken,
    settings: RetrySettings,
    idle_delay: Duration,
    context: &mut C,
) where
    C: RetryContext + Send,
{
    let mut current = settings.initial();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = context.poll() => match result {
                Ok(Some(item)) => {
                    current = settings.initial();
                    context.handle_item(item).await;
                }
                Ok(None) => {
                    if sleep_with_shutdown(idle_delay, &shutdown).await {
                        break;
                    }
                }
                Err(err) => {
                    let delay = backoff_delay(current);
                    current = next_backoff(current, &settings);
                    context.report_error(&err, delay).await;
                    if sleep_with_shutdown(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }
    }
}

fn backoff_delay(current: Duration) -> Duration {
    current.max(Duration::from_millis(50))
}

fn next_backoff(current: Duration, settings: &RetrySettings) -> Duration {
    let delay = backoff_delay(current);
    let next = (delay.as_millis() as f64 * settings.multiplier()).round();
    let capped = next.min(settings.max().as_millis() as f64);
    let next_duration = Duration::from_millis(capped as u64);
    std::cmp::min(next_duration, settings.max())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_until_capped() {
        let settings = RetrySettings::new(Duration::from_millis(100), Duration::from_millis(500), 2.0);
        let mut current = settings.initial();
        let mut observed = Vec::new();
        for _ in 0..5 {
            observed.push(backoff_delay(current).as_millis());
            current = next_backoff(current, &settings);
        }
        assert_eq!(observed, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn max_never_below_initial() {
        let settings = RetrySettings::new(Duration::from_secs(2), Duration::from_secs(1), 0.5);
        assert_eq!(settings.max(), Duration::from_secs(2));
        assert!((settings.multiplier() - 1.1).abs() < f64::EPSILON);
    }
}
