use std::future::Future;
use std::time::Duration;

use anyhow::{Context as _, Result};

const FIRST_POLL_DELAY: Duration = Duration::from_millis(5);
const MAX_POLL_DELAY: Duration = Duration::from_millis(100);

/// Polls `poll` with a growing delay until it yields a value, giving up
/// after `timeout`. Swap progress is asynchronous, so tests wait on the
/// store or the fakes instead of asserting right after an event.
pub async fn wait_for<T, F, Fut>(description: &str, timeout: Duration, mut poll: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let polling = async {
        let mut delay = FIRST_POLL_DELAY;
        loop {
            match poll().await.with_context(|| format!("poll {description}")) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => return Err(err),
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    };

    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out after {timeout:?} waiting for {description}"),
    }
}

/// `wait_for` over a plain condition, such as a fake watch being armed.
pub async fn wait_until<F>(description: &str, timeout: Duration, mut ready: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    wait_for(description, timeout, || {
        let done = ready();
        async move { Ok(done.then_some(())) }
    })
    .await
}
