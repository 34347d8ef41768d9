//! Legacy engine tests — flow control, return handlers, batches, helpers,
//! and the adapters to and from the structural engine.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use postrpc_engine::legacy::*;
    use postrpc_engine::{Context, JsonRpcEngine, Next, boxed, from_fn, legacy_as_v2};
    use postrpc_protocol::{Call, Fault, NativeError, RequestId, Response, RpcError};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    fn mw<F>(f: F) -> F
    where
        F: Fn(SharedRequest, SharedResponse, Flow) -> Result<(), Fault> + Send + Sync + 'static,
    {
        f
    }

    fn call(id: i64, method: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method})
    }

    async fn handle(engine: &LegacyEngine, raw: Value) -> Response {
        engine
            .handle(raw)
            .await
            .expect("handle failed")
            .expect("no response")
    }

    fn result_end(value: Value) -> impl LegacyMiddleware {
        mw(move |_req, res, flow| {
            res.lock().result = Some(value.clone());
            flow.end();
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Basic flow
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn end_with_result() {
        let engine = LegacyEngine::new();
        engine.push(result_end(json!(42)));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!(42)));
        assert_eq!(response.id(), Some(&RequestId::Number(1)));
    }

    #[tokio::test]
    async fn middleware_sees_request() {
        let engine = LegacyEngine::new();
        engine.push(mw(|req, res, flow| {
            let method = req.lock().method.clone();
            res.lock().result = Some(json!(method));
            flow.end();
            Ok(())
        }));

        let response = handle(&engine, call(1, "hello")).await;
        assert_eq!(response.result(), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn end_with_error() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, _res, flow| {
            flow.end_with(NativeError::new("boom"));
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "boom");
        assert!(response.result().is_none());
    }

    #[tokio::test]
    async fn synchronous_error_ends_request() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, _res, _flow| Err(RpcError::invalid_params("bad").into())));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.error_object().unwrap().code, -32602);
    }

    #[tokio::test]
    async fn next_with_existing_error_ends() {
        let reached = Arc::new(AtomicUsize::new(0));
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, res, flow| {
            res.lock().error = Some(RpcError::unauthorized());
            flow.next();
            Ok(())
        }));
        let counter = reached.clone();
        engine.push(mw(move |_req, res, flow| {
            counter.fetch_add(1, Ordering::SeqCst);
            res.lock().result = Some(json!(1));
            flow.end();
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.error_object().unwrap().code, 4100);
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_completion() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, _res, flow| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flow.next();
            });
            Ok(())
        }));
        engine.push(mw(|_req, res, flow| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                res.lock().result = Some(json!("late"));
                flow.end();
            });
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!("late")));
    }

    #[tokio::test]
    async fn dropped_flow_is_internal_error() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, _res, flow| {
            drop(flow);
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.error_object().unwrap().code, -32603);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Completion checks
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn no_error_or_result() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, _res, flow| {
            flow.end();
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.message.contains("Response has no error or result"));
    }

    #[tokio::test]
    async fn nothing_ended_request() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, res, flow| {
            res.lock().result = Some(json!(true));
            flow.next();
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.message.contains("Nothing ended request"));
    }

    #[tokio::test]
    async fn empty_stack_has_no_result() {
        let engine = LegacyEngine::new();
        let response = handle(&engine, call(1, "x")).await;
        assert!(response.is_error());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Return handlers
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn return_handlers_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let engine = LegacyEngine::new();

        for i in 0..3 {
            let order = order.clone();
            engine.push(mw(move |_req, _res, flow| {
                let order = order.clone();
                flow.next_with(move || async move {
                    tokio::time::sleep(Duration::from_millis(5 * (3 - i))).await;
                    order.lock().push(i);
                    Ok(())
                });
                Ok(())
            }));
        }
        engine.push(result_end(json!("done")));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!("done")));
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn return_handler_can_edit_result() {
        let engine = LegacyEngine::new();
        engine.push(mw(|_req, res, flow| {
            flow.next_with(move || async move {
                let mut draft = res.lock();
                let inner = draft.result.take().unwrap_or(Value::Null);
                draft.result = Some(json!({ "outer": inner }));
                Ok(())
            });
            Ok(())
        }));
        engine.push(result_end(json!(1)));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!({ "outer": 1 })));
    }

    #[tokio::test]
    async fn failing_return_handler_aborts_unwind() {
        let ran = Arc::new(AtomicUsize::new(0));
        let engine = LegacyEngine::new();

        let counter = ran.clone();
        engine.push(mw(move |_req, _res, flow| {
            let counter = counter.clone();
            flow.next_with(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }));
        engine.push(mw(|_req, _res, flow| {
            flow.next_with(|| async { Err(Fault::msg("unwind failed")) });
            Ok(())
        }));
        engine.push(result_end(json!(1)));

        let response = handle(&engine, call(1, "x")).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.message, "unwind failed");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Input handling
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn malformed_input_skips_middleware() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        let engine = LegacyEngine::new();
        engine.push(mw(move |_req, res, flow| {
            counter.fetch_add(1, Ordering::SeqCst);
            res.lock().result = Some(json!(1));
            flow.end();
            Ok(())
        }));

        let response = handle(&engine, json!("not an object")).await;
        assert_eq!(response.error_object().unwrap().code, -32600);

        let response = handle(&engine, json!({"jsonrpc": "2.0", "id": 4, "method": 12})).await;
        assert_eq!(response.error_object().unwrap().code, -32600);
        assert_eq!(response.id(), Some(&RequestId::Number(4)));

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_single_error() {
        let engine = LegacyEngine::new();
        let responses = engine.handle_batch(Vec::new()).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].error_object().unwrap().code, -32600);
    }

    #[tokio::test]
    async fn batch_elements_are_independent() {
        let engine = LegacyEngine::new();
        engine.push(mw(|req, res, flow| {
            let method = req.lock().method.clone();
            if method == "fail" {
                flow.end_with(RpcError::internal("failed"));
            } else {
                res.lock().result = Some(json!(method));
                flow.end();
            }
            Ok(())
        }));

        let responses = engine
            .handle_batch(vec![call(1, "a"), call(2, "fail"), call(3, "c")])
            .await
            .unwrap();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].result(), Some(&json!("a")));
        assert!(responses[1].is_error());
        assert_eq!(responses[2].result(), Some(&json!("c")));
    }

    #[tokio::test]
    async fn closed_notification_sink_fails_element_only() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let engine = LegacyEngine::new().with_notification_sink(tx);
        engine.push(result_end(json!(1)));

        let batch = vec![call(1, "a"), json!({"jsonrpc": "2.0", "method": "note"})];

        let each = engine.handle_each(batch.clone()).await;
        assert!(each[0].as_ref().unwrap().is_some());
        assert!(each[1].is_err());

        assert!(engine.handle_batch(batch).await.is_err());
    }

    #[tokio::test]
    async fn notifications_go_to_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = LegacyEngine::new().with_notification_sink(tx);
        engine.push(result_end(json!(1)));

        let response = engine
            .handle(json!({"jsonrpc": "2.0", "method": "note", "params": [1]}))
            .await
            .unwrap();
        assert!(response.is_none());

        let note = rx.recv().await.unwrap();
        assert_eq!(note.method(), "note");
        assert_eq!(note.params(), Some(&json!([1])));
    }

    #[tokio::test]
    async fn handle_any_serializes_output() {
        let engine = LegacyEngine::new();
        engine.push(result_end(json!("ok")));

        let single = engine.handle_any(call(9, "x")).await.unwrap().unwrap();
        assert_eq!(single, json!({"jsonrpc": "2.0", "id": 9, "result": "ok"}));

        let batch = engine.handle_any(json!([call(1, "a")])).await.unwrap().unwrap();
        assert_eq!(batch.as_array().unwrap().len(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn async_middleware_resumes_after_downstream() {
        let engine = LegacyEngine::new();
        engine.push(from_async(|_req, res: SharedResponse, next: AsyncNext| async move {
            next.run().await?;
            let mut draft = res.lock();
            let inner = draft.result.take().unwrap_or(Value::Null);
            draft.result = Some(json!([inner, "after"]));
            Ok(())
        }));
        engine.push(result_end(json!("inner")));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!(["inner", "after"])));
    }

    #[tokio::test]
    async fn async_middleware_ends_without_next() {
        let engine = LegacyEngine::new();
        engine.push(from_async(|_req, res: SharedResponse, _next| async move {
            tokio::task::yield_now().await;
            res.lock().result = Some(json!("direct"));
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!("direct")));
    }

    #[tokio::test]
    async fn async_middleware_error_after_next() {
        let engine = LegacyEngine::new();
        engine.push(from_async(|_req, _res, next: AsyncNext| async move {
            next.run().await?;
            Err(Fault::msg("post-processing failed"))
        }));
        engine.push(result_end(json!(1)));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.error_object().unwrap().message, "post-processing failed");
    }

    #[tokio::test]
    async fn async_middleware_skipped_when_unwind_aborts() {
        let resumed = Arc::new(AtomicUsize::new(0));
        let engine = LegacyEngine::new();
        let flag = resumed.clone();
        engine.push(from_async(move |_req, _res, next: AsyncNext| {
            let flag = flag.clone();
            async move {
                next.run().await?;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        engine.push(mw(|_req, _res, flow| {
            flow.next_with(|| async { Err(Fault::msg("handler failed")) });
            Ok(())
        }));
        engine.push(result_end(json!(1)));

        let response = handle(&engine, call(1, "x")).await;
        assert_eq!(response.error_object().unwrap().message, "handler failed");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(resumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_middleware_skipped_when_nothing_ends() {
        let resumed = Arc::new(AtomicUsize::new(0));
        let engine = LegacyEngine::new();
        let flag = resumed.clone();
        engine.push(from_async(move |_req, _res, next: AsyncNext| {
            let flag = flag.clone();
            async move {
                next.run().await?;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        engine.push(mw(|_req, _res, flow| {
            flow.next();
            Ok(())
        }));

        let response = handle(&engine, call(1, "x")).await;
        assert!(response.error_object().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(resumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scaffold_routes_methods() {
        let engine = LegacyEngine::new();
        engine.push(scaffold([
            ("hello", ScaffoldEntry::from(json!("world"))),
            (
                "custom",
                ScaffoldEntry::Middleware(Arc::new(result_end(json!("handled")))),
            ),
        ]));
        engine.push(result_end(json!("fallback")));

        assert_eq!(handle(&engine, call(1, "hello")).await.result(), Some(&json!("world")));
        assert_eq!(handle(&engine, call(2, "custom")).await.result(), Some(&json!("handled")));
        assert_eq!(handle(&engine, call(3, "other")).await.result(), Some(&json!("fallback")));
    }

    #[tokio::test]
    async fn id_remap_restores_original_id() {
        let seen = Arc::new(Mutex::new(None));
        let engine = LegacyEngine::new();
        engine.push(id_remap());

        let recorder = seen.clone();
        engine.push(mw(move |req, res, flow| {
            *recorder.lock() = req.lock().id.clone();
            res.lock().result = Some(json!(true));
            flow.end();
            Ok(())
        }));

        let response = handle(&engine, json!({"jsonrpc": "2.0", "id": "orig", "method": "x"})).await;
        assert_eq!(response.id(), Some(&RequestId::String("orig".into())));

        let inner_id = seen.lock().clone().unwrap();
        assert!(matches!(inner_id, RequestId::Number(_)));
    }

    #[tokio::test]
    async fn nested_legacy_engine() {
        let inner = LegacyEngine::new();
        inner.push(mw(|_req, _res, flow| {
            flow.next_with(move || async move { Ok(()) });
            Ok(())
        }));

        let outer = LegacyEngine::new();
        outer.push_boxed(inner.as_middleware());
        outer.push(result_end(json!("outer")));

        let response = handle(&outer, call(1, "x")).await;
        assert_eq!(response.result(), Some(&json!("outer")));

        let ending = LegacyEngine::new();
        ending.push(result_end(json!("inner")));
        let outer = LegacyEngine::new();
        outer.push_boxed(ending.as_middleware());
        outer.push(result_end(json!("unreached")));

        let response = handle(&outer, call(2, "x")).await;
        assert_eq!(response.result(), Some(&json!("inner")));
    }

    #[tokio::test]
    async fn nested_engine_sees_middleware_pushed_later() {
        let inner = LegacyEngine::new();
        let outer = LegacyEngine::new();
        outer.push_boxed(inner.as_middleware());
        outer.push(result_end(json!("outer")));

        assert_eq!(handle(&outer, call(1, "x")).await.result(), Some(&json!("outer")));

        inner.push(result_end(json!("inner")));
        assert_eq!(handle(&outer, call(2, "x")).await.result(), Some(&json!("inner")));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Adapters
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn legacy_stack_inside_structural_engine() {
        let legacy = LegacyEngine::new();
        legacy.push(mw(|req, res, flow| {
            let method = req.lock().method.clone();
            if method == "legacy" {
                res.lock().result = Some(json!("from legacy"));
                flow.end();
            } else {
                req.lock().method = "rewritten".into();
                flow.next_with(move || async move {
                    let mut draft = res.lock();
                    let inner = draft.result.take().unwrap_or(Value::Null);
                    draft.result = Some(json!({ "unwound": inner }));
                    Ok(())
                });
            }
            Ok(())
        }));

        let engine = JsonRpcEngine::builder()
            .with(legacy_as_v2(&legacy))
            .with(from_fn(|call: Arc<Call>, _ctx, _next: Next| async move {
                Ok(Some(json!(call.method())))
            }))
            .build()
            .unwrap();

        let result = engine.handle(Call::request(1i64, "legacy", None)).await.unwrap();
        assert_eq!(result, Some(json!("from legacy")));

        let result = engine.handle(Call::request(2i64, "other", None)).await.unwrap();
        assert_eq!(result, Some(json!({ "unwound": "rewritten" })));
    }

    #[tokio::test]
    async fn legacy_error_surfaces_as_application_error() {
        let legacy = LegacyEngine::new();
        legacy.push(mw(|_req, _res, flow| {
            flow.end_with(RpcError::user_rejected());
            Ok(())
        }));

        let engine = JsonRpcEngine::builder()
            .with(legacy_as_v2(&legacy))
            .build()
            .unwrap();

        let err = engine.handle(Call::request(1i64, "x", None)).await.unwrap_err();
        assert!(!err.is_protocol());
        assert_eq!(err.to_rpc_error().code, 4001);
    }

    #[tokio::test]
    async fn adapter_sees_middleware_pushed_later() {
        let legacy = LegacyEngine::new();
        let engine = JsonRpcEngine::builder()
            .with(legacy_as_v2(&legacy))
            .with(from_fn(|_call: Arc<Call>, _ctx, _next: Next| async move {
                Ok(Some(json!("fell through")))
            }))
            .build()
            .unwrap();

        let result = engine.handle(Call::request(1i64, "x", None)).await.unwrap();
        assert_eq!(result, Some(json!("fell through")));

        legacy.push(result_end(json!("pushed later")));
        let result = engine.handle(Call::request(2i64, "x", None)).await.unwrap();
        assert_eq!(result, Some(json!("pushed later")));
    }

    #[tokio::test]
    async fn structural_engine_inside_legacy_engine() {
        let structural = Arc::new(
            JsonRpcEngine::builder()
                .with(from_fn(|call: Arc<Call>, ctx: Context, next: Next| async move {
                    if call.method() == "v2" {
                        ctx.set("touched", json!(true))?;
                        return Ok(Some(json!("from v2")));
                    }
                    next.run_with(call.with_method("passed")).await
                }))
                .build()
                .unwrap(),
        );

        let legacy = LegacyEngine::new();
        legacy.push_boxed(structural.as_legacy_middleware());
        legacy.push(mw(|req, res, flow| {
            let method = req.lock().method.clone();
            res.lock().result = Some(json!(method));
            flow.end();
            Ok(())
        }));

        assert_eq!(handle(&legacy, call(1, "v2")).await.result(), Some(&json!("from v2")));
        assert_eq!(handle(&legacy, call(2, "x")).await.result(), Some(&json!("passed")));
    }

    #[tokio::test]
    async fn pending_request_round_trips_call() {
        let call = Call::request(3i64, "m", Some(json!({"a": 1})));
        let draft = PendingRequest::from_call(&call, Context::new());
        assert_eq!(draft.to_call(), call);

        let notification = Call::notification("n", None);
        let draft = PendingRequest::from_call(&notification, Context::new());
        assert!(draft.to_call().is_notification());
    }

    #[test]
    fn boxed_adapter_is_middleware() {
        let legacy = LegacyEngine::new();
        legacy.push(result_end(json!(1)));
        let _ = boxed(legacy_as_v2(&legacy));
    }
}
