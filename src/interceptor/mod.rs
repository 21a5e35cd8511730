use crate::dispatch::Exchange;
use crate::exception::DispatchResult;
use async_trait::async_trait;
use std::sync::Arc;

mod logging;

pub use logging::LoggingInterceptor;

/// The innermost step of a chain: the controller invocation.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, exchange: &mut Exchange) -> DispatchResult;
}

/// Represents the rest of the chain after the current interceptor.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Interceptor>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Execute the next interceptor, or the endpoint once the chain is exhausted.
    pub async fn run(self, exchange: &mut Exchange) -> DispatchResult {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.intercept(exchange, Next::new(rest, self.endpoint))
                    .await
            }
            None => self.endpoint.call(exchange).await,
        }
    }
}

/// The Interceptor trait
///
/// Interceptors wrap everything after them in the chain: they may inspect or
/// modify the exchange before calling `next`, after it returns, or complete
/// the response themselves and never call it.
///
/// # Example
/// ```
/// use stratus::interceptor::{Interceptor, Next};
/// use stratus::dispatch::Exchange;
/// use stratus::exception::DispatchResult;
/// use async_trait::async_trait;
///
/// struct Stamp;
///
/// #[async_trait]
/// impl Interceptor for Stamp {
///     async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult {
///         exchange.put("stamped", true.into());
///         next.run(exchange).await
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::exchange::test_exchange;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult {
            self.log.lock().unwrap().push(format!("in:{}", self.name));
            next.run(exchange).await?;
            self.log.lock().unwrap().push(format!("out:{}", self.name));
            Ok(())
        }
    }

    struct Invoke(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Endpoint for Invoke {
        async fn call(&self, _exchange: &mut Exchange) -> DispatchResult {
            self.0.lock().unwrap().push("invoke".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chain_nests_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Recorder { name: "a", log: log.clone() }),
            Arc::new(Recorder { name: "b", log: log.clone() }),
        ];
        let endpoint = Invoke(log.clone());
        let mut ex = test_exchange("/");

        Next::new(&chain, &endpoint).run(&mut ex).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["in:a", "in:b", "invoke", "out:b", "out:a"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_calls_endpoint() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let endpoint = Invoke(log.clone());
        let mut ex = test_exchange("/");
        Next::new(&[], &endpoint).run(&mut ex).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["invoke"]);
    }
}
