//! Paced response bodies for simulating slow links.

use axum::body::Body;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;

/// Split `data` into chunks of at most `chunk_bytes`, sleeping `delay` before
/// each one. Slicing shares the underlying buffer.
pub fn paced_stream(
    data: Bytes,
    delay: Duration,
    chunk_bytes: usize,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunk_bytes = chunk_bytes.max(1);
    async_stream::stream! {
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_bytes).min(data.len());
            tokio::time::sleep(delay).await;
            yield Ok(data.slice(offset..end));
            offset = end;
        }
    }
}

/// Response body for `data`, paced when `delay` is non-zero.
pub fn body(data: Bytes, delay: Duration, chunk_bytes: usize) -> Body {
    if delay.is_zero() {
        Body::from(data)
    } else {
        Body::from_stream(paced_stream(data, delay, chunk_bytes))
    }
}
