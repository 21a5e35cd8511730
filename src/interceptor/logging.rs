use crate::dispatch::Exchange;
use crate::exception::DispatchResult;
use crate::interceptor::{Interceptor, Next};
use async_trait::async_trait;
use std::time::Instant;

/// An interceptor that logs request timing and status
#[derive(Clone, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult {
        let method = exchange.method().clone();
        let path = exchange.path().to_string();
        let start = Instant::now();

        tracing::info!(%method, %path, "-->");

        match next.run(exchange).await {
            Ok(()) => {
                let status = exchange.status();
                tracing::info!(%method, %path, status = status.as_u16(), elapsed = ?start.elapsed(), "<--");
                Ok(())
            }
            Err(e) => {
                tracing::info!(%method, %path, error = %e, elapsed = ?start.elapsed(), "<-- failed");
                Err(e)
            }
        }
    }
}
