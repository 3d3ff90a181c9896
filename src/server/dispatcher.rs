//! Request dispatch: validation, cache consultation and mode handlers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::error::{Result, WireError};
use crate::eval;
use crate::protocol::{Mode, Request, Response};
use crate::providers::Generator;
use crate::session::FrameHandler;

/// Routes decoded requests to the `calc` and `generate` handlers.
///
/// One dispatcher is shared by every connection of a server. Successful
/// results are stored in the shared cache under the request's canonical key;
/// failures never are.
pub struct Dispatcher {
    cache: Arc<ResponseCache<Value>>,
    generator: Arc<dyn Generator>,
}

impl Dispatcher {
    pub fn new(cache: Arc<ResponseCache<Value>>, generator: Arc<dyn Generator>) -> Self {
        Self { cache, generator }
    }

    pub fn cache(&self) -> &Arc<ResponseCache<Value>> {
        &self.cache
    }

    /// Decode `frame` and answer it.
    pub async fn handle_bytes(&self, frame: &[u8]) -> Response {
        match Request::from_frame(frame) {
            Ok(request) => self.dispatch(&request).await,
            Err(e) => {
                debug!(error = %e, "Rejected request");
                Response::from_error(&e)
            }
        }
    }

    /// Answer a decoded request, consulting the cache first unless the
    /// request opted out.
    pub async fn dispatch(&self, request: &Request) -> Response {
        let started = Instant::now();
        let key = request.options.cache.then(|| cache_key(&request.raw));

        if let Some(key) = &key {
            if let Some(result) = self.cache.get(key) {
                debug!(mode = %request.mode, "Cache hit");
                return Response::success(result, true, elapsed_ms(started));
            }
        }

        match self.execute(request).await {
            Ok(result) => {
                let took_ms = elapsed_ms(started);
                if let Some(key) = key {
                    self.cache.put(key, result.clone());
                }
                debug!(mode = %request.mode, took_ms, "Request handled");
                Response::success(result, false, took_ms)
            }
            Err(e) => {
                warn!(mode = %request.mode, error = %e, "Request failed");
                Response::from_error(&e)
            }
        }
    }

    async fn execute(&self, request: &Request) -> Result<Value> {
        match Mode::from_wire(&request.mode) {
            Some(Mode::Calc) => {
                let expr = request.required_str("expr")?;
                Ok(Value::from(eval::evaluate(expr)?))
            }
            Some(Mode::Generate) => {
                let prompt = request.required_str("prompt")?;
                let text = self
                    .generator
                    .generate(prompt)
                    .await
                    .map_err(|e| match e {
                        WireError::Backend(_) => e,
                        other => WireError::Backend(other.to_string()),
                    })?;
                Ok(Value::String(text))
            }
            None => Err(WireError::Validation("unknown mode".to_string())),
        }
    }
}

#[async_trait]
impl FrameHandler for Dispatcher {
    type Reply = Response;

    async fn handle_frame(&self, frame: &[u8]) -> Response {
        self.handle_bytes(frame).await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::UnconfiguredGenerator;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Generator that upper-cases the prompt and counts calls.
    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prompt.to_uppercase())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn dispatcher_with(generator: Arc<dyn Generator>) -> Dispatcher {
        let cache = Arc::new(ResponseCache::with_capacity(8).unwrap());
        Dispatcher::new(cache, generator)
    }

    fn dispatcher() -> Dispatcher {
        dispatcher_with(Arc::new(UnconfiguredGenerator))
    }

    async fn send(d: &Dispatcher, request: Value) -> Response {
        d.handle_bytes(request.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn test_calc_then_cache_hit() {
        let d = dispatcher();
        let req = json!({"mode": "calc", "data": {"expr": "sin(0)"}, "options": {"cache": true}});

        let first = send(&d, req.clone()).await;
        assert!(first.ok);
        assert_eq!(first.result, Some(json!(0.0)));
        assert!(!first.meta.as_ref().unwrap().from_cache);

        let second = send(&d, req).await;
        assert_eq!(second.result, Some(json!(0.0)));
        assert!(second.meta.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_reordered_fields_hit_cache() {
        let d = dispatcher();
        d.handle_bytes(br#"{"mode":"calc","data":{"expr":"2+3"},"options":{"cache":true}}"#)
            .await;
        let hit = d
            .handle_bytes(br#"{"options":{"cache":true},"data":{"expr":"2+3"},"mode":"calc"}"#)
            .await;
        assert_eq!(hit.result, Some(json!(5.0)));
        assert!(hit.meta.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_cache_opt_out_neither_reads_nor_writes() {
        let d = dispatcher();
        let req = json!({"mode": "calc", "data": {"expr": "1+1"}, "options": {"cache": false}});
        send(&d, req.clone()).await;
        let again = send(&d, req).await;
        assert!(!again.meta.unwrap().from_cache);
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_options_defaults_to_caching() {
        let d = dispatcher();
        let req = json!({"mode": "calc", "data": {"expr": "2**10"}});
        send(&d, req.clone()).await;
        let hit = send(&d, req).await;
        assert_eq!(hit.result, Some(json!(1024.0)));
        assert!(hit.meta.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let d = dispatcher();
        let req = json!({"mode": "calc", "data": {"expr": "1/0"}});
        let first = send(&d, req.clone()).await;
        assert!(!first.ok);
        assert!(first.meta.is_none());
        assert!(first
            .error
            .as_deref()
            .unwrap()
            .starts_with("Evaluation error:"));
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let resp = dispatcher().handle_bytes(b"{not json").await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().starts_with("Malformed request:"));
    }

    #[tokio::test]
    async fn test_unknown_mode() {
        let resp = send(&dispatcher(), json!({"mode": "sql", "data": {}})).await;
        assert_eq!(resp.error.as_deref(), Some("Bad request: unknown mode"));
    }

    #[tokio::test]
    async fn test_missing_or_non_string_mode_is_unknown() {
        let d = dispatcher();
        for request in [json!({"data": {"expr": "1"}}), json!({"mode": 7, "data": {}})] {
            let resp = send(&d, request).await;
            assert_eq!(resp.error.as_deref(), Some("Bad request: unknown mode"));
        }
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_expr() {
        let resp = send(&dispatcher(), json!({"mode": "calc", "data": {}})).await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("'expr' is required"));
    }

    #[tokio::test]
    async fn test_rejected_expression() {
        let resp = send(
            &dispatcher(),
            json!({"mode": "calc", "data": {"expr": "__import__('os')"}}),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().starts_with("Evaluation error:"));
    }

    #[tokio::test]
    async fn test_generate_uses_backend_and_caches() {
        let generator = Arc::new(EchoGenerator::default());
        let d = dispatcher_with(generator.clone());
        let req = json!({"mode": "generate", "data": {"prompt": "hi"}});

        let first = send(&d, req.clone()).await;
        assert_eq!(first.result, Some(json!("HI")));
        let second = send(&d, req).await;
        assert!(second.meta.unwrap().from_cache);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gpt_alias_routes_to_generate() {
        let d = dispatcher_with(Arc::new(EchoGenerator::default()));
        let resp = send(&d, json!({"mode": "gpt", "data": {"prompt": "ok"}})).await;
        assert_eq!(resp.result, Some(json!("OK")));
    }

    #[tokio::test]
    async fn test_backend_failure_is_generation_error() {
        let resp = send(
            &dispatcher(),
            json!({"mode": "generate", "data": {"prompt": "hi"}}),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().starts_with("Generation error:"));
    }

    #[tokio::test]
    async fn test_modes_do_not_share_entries() {
        let d = dispatcher_with(Arc::new(EchoGenerator::default()));
        send(&d, json!({"mode": "calc", "data": {"expr": "1"}})).await;
        let other = send(&d, json!({"mode": "generate", "data": {"expr": "1", "prompt": "x"}})).await;
        assert!(!other.meta.unwrap().from_cache);
        assert_eq!(d.cache().len(), 2);
    }
}
