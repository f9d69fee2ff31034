use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Retry `f` up to `max_attempts` times with exponential backoff and jitter:
/// `base * 2^(n-1) + U(0, 0.5*base)`.
pub async fn retry_with_backoff<F, Fut, T>(max_attempts: u32, base: Duration, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(_) => {
                let exp = base.mul_f64(2f64.powi(attempt as i32 - 1));
                let jitter_secs = rand::thread_rng().gen_range(0.0..(0.5 * base.as_secs_f64()));
                tokio::time::sleep(exp + Duration::from_secs_f64(jitter_secs)).await;
            }
        }
    }
}
