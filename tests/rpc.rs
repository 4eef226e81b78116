mod common;

use chanbus::{vargs, CallError, Callback, Procedure, Server, Value};
use common::*;
use rstest::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

fn spawn_owner_loop(server: Arc<Server>) {
    tokio::spawn(async move {
        while let Ok(ci) = server.call_channel().recv().await {
            server.exec(ci).await;
        }
    });
}

fn new_calc_server() -> Server {
    let mut server = Server::new(16);
    server.register(
        "add",
        Procedure::one(|args| {
            Value::from(args[0].as_int().unwrap() + args[1].as_int().unwrap())
        }),
    );
    server.register("echo", Procedure::one(|args| Value::from(args[0].as_int().unwrap())));
    server.register("nop", Procedure::void(|_| {}));
    server.register(
        "swap",
        Procedure::multi(|args| {
            vec![
                Value::from(args[1].as_int().unwrap()),
                Value::from(args[0].as_int().unwrap()),
            ]
        }),
    );
    server.register("explode", Procedure::one(|_| panic!("index out of range")));
    server
}

#[rstest]
fn test_sync_single_value_call(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let client = server.open(0);
        let server = Arc::new(server);
        spawn_owner_loop(server);

        let r = client.call_one("add", vargs![1, 2]).await.unwrap();
        assert_eq!(r.as_int(), Some(3));
    });
}

#[rstest]
fn test_sync_void_and_multi_calls(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let client = server.open(0);
        let server = Arc::new(server);
        spawn_owner_loop(server);

        client.call_void("nop", vargs![]).await.unwrap();
        let r = client.call_multi("swap", vargs![1, 2]).await.unwrap();
        assert_eq!(r, vargs![2, 1]);
    });
}

#[rstest]
fn test_unknown_method(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let client = server.open(0);
        assert_eq!(client.call_void("nope", vargs![]).await.unwrap_err(), CallError::NotFound);
    });
}

#[rstest]
fn test_arity_mismatch(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let client = server.open(0);
        let server = Arc::new(server);
        spawn_owner_loop(server);

        // "add" is registered with arity one
        let e = client.call_multi("add", vargs![1, 2]).await.unwrap_err();
        assert_eq!(e, CallError::ArityMismatch);
        let e = client.call_void("add", vargs![1, 2]).await.unwrap_err();
        assert_eq!(e, CallError::ArityMismatch);

        // the mismatch left the server fully operational
        let r = client.call_one("add", vargs![1, 2]).await.unwrap();
        assert_eq!(r.as_int(), Some(3));
    });
}

#[rstest]
fn test_procedure_panic_contained(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let client = server.open(0);
        let server = Arc::new(server);
        spawn_owner_loop(server);

        match client.call_one("explode", vargs![]).await.unwrap_err() {
            CallError::Panicked { reason } => assert!(reason.contains("index out of range")),
            e => panic!("expected panic error, got {}", e),
        }
        // the owner loop survived the panic
        let r = client.call_one("echo", vargs![42]).await.unwrap();
        assert_eq!(r.as_int(), Some(42));
    });
}

#[rstest]
fn test_server_convenience_calls(runner: TestRunner) {
    runner.block_on(async move {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut server = new_calc_server();
        {
            let hits = hits.clone();
            server.register(
                "tick",
                Procedure::void(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let server = Arc::new(server);
        spawn_owner_loop(server.clone());

        let r = server.call_one("add", vargs![10, 20]).await.unwrap();
        assert_eq!(r.as_int(), Some(30));
        server.call_void("tick", vargs![]).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let r = server.call_multi("swap", vargs![7, 9]).await.unwrap();
        assert_eq!(r, vargs![9, 7]);

        // fire-and-forget: the result is discarded, only the effect remains
        server.go("tick", vargs![]).await;
        // unknown methods are logged and dropped, not errors
        server.go("nope", vargs![]).await;
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    });
}

#[rstest]
fn test_async_call_busy_fast_fail(runner: TestRunner) {
    runner.block_on(async move {
        let mut server = Server::new(16);
        let gate = Arc::new(Barrier::new(2));
        {
            let gate = gate.clone();
            server.register(
                "wait",
                Procedure::one(move |_| {
                    gate.wait();
                    Value::from(7)
                }),
            );
        }
        let mut client = server.open(1);
        let server = Arc::new(server);
        spawn_owner_loop(server);

        let results: Arc<Mutex<Vec<Result<i64, CallError>>>> = Arc::new(Mutex::new(Vec::new()));
        let record = |results: &Arc<Mutex<Vec<Result<i64, CallError>>>>| {
            let results = results.clone();
            Callback::one(move |r| {
                results.lock().unwrap().push(r.map(|v| v.as_int().unwrap()));
            })
        };

        // call 1 occupies the single async slot
        client.async_call("wait", vargs![], record(&results));
        assert!(!client.is_idle());
        // call 2 fast-fails busy, right on the submitting task
        client.async_call("wait", vargs![], record(&results));
        assert_eq!(*results.lock().unwrap(), vec![Err(CallError::Busy)]);

        // release the procedure and drain the success reply
        gate.wait();
        let ri = client.async_return_channel().recv().await.unwrap();
        client.cb(ri);

        assert_eq!(*results.lock().unwrap(), vec![Err(CallError::Busy), Ok(7)]);
        assert!(client.is_idle());
    });
}

#[rstest]
fn test_async_call_full_call_channel(runner: TestRunner) {
    runner.block_on(async move {
        // call channel of one slot, and nobody draining it yet
        let mut server = Server::new(1);
        server.register("echo", Procedure::one(|args| Value::from(args[0].as_int().unwrap())));
        let mut client = server.open(8);

        let results: Arc<Mutex<Vec<Result<i64, CallError>>>> = Arc::new(Mutex::new(Vec::new()));
        let record = |results: &Arc<Mutex<Vec<Result<i64, CallError>>>>| {
            let results = results.clone();
            Callback::one(move |r| {
                results.lock().unwrap().push(r.map(|v| v.as_int().unwrap()));
            })
        };

        client.async_call("echo", vargs![1], record(&results));
        // server congestion surfaces as a synthetic busy reply
        client.async_call("echo", vargs![2], record(&results));
        assert!(!client.is_idle());

        let ri = client.async_return_channel().recv().await.unwrap();
        client.cb(ri);
        assert_eq!(*results.lock().unwrap(), vec![Err(CallError::Busy)]);

        // now drain the queued call and its reply
        let ci = server.call_channel().recv().await.unwrap();
        server.exec(ci).await;
        let ri = client.async_return_channel().recv().await.unwrap();
        client.cb(ri);

        assert_eq!(*results.lock().unwrap(), vec![Err(CallError::Busy), Ok(1)]);
        assert!(client.is_idle());
    });
}

#[rstest]
fn test_async_callback_shape_mismatch(runner: TestRunner) {
    runner.block_on(async move {
        let server = new_calc_server();
        let mut client = server.open(4);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        // "add" has arity one; a void callback is rejected through itself
        client.async_call(
            "add",
            vargs![1, 2],
            Callback::void(move |r| {
                assert_eq!(r.unwrap_err(), CallError::ArityMismatch);
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        client.close().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(client.is_idle());
    });
}

#[rstest]
fn test_server_close_fails_backlog(runner: TestRunner) {
    runner.block_on(async move {
        let mut server = new_calc_server();
        let mut client = server.open(2);

        let errs = Arc::new(Mutex::new(Vec::new()));
        let record = |errs: &Arc<Mutex<Vec<CallError>>>| {
            let errs = errs.clone();
            Callback::void(move |r| {
                errs.lock().unwrap().push(r.unwrap_err());
            })
        };
        client.async_call("nop", vargs![], record(&errs));
        client.async_call("nop", vargs![], record(&errs));

        // nobody drained the call channel; close must fail the backlog
        server.close().await;
        client.close().await;
        assert_eq!(*errs.lock().unwrap(), vec![CallError::ServerClosed, CallError::ServerClosed]);
        assert!(client.is_idle());

        // the server accepts nothing anymore
        let e = client.call_void("nop", vargs![]).await.unwrap_err();
        assert_eq!(e, CallError::ServerClosed);
    });
}

#[rstest]
fn test_client_close_executes_outstanding(runner: TestRunner) {
    runner.block_on(async move {
        let mut server = new_calc_server();
        let mut client = server.open(4);

        let sum = Arc::new(AtomicUsize::new(0));
        let record = |sum: &Arc<AtomicUsize>| {
            let sum = sum.clone();
            Callback::one(move |r| {
                sum.fetch_add(r.unwrap().as_int().unwrap() as usize, Ordering::SeqCst);
            })
        };
        client.async_call("echo", vargs![4], record(&sum));
        client.async_call("echo", vargs![5], record(&sum));

        for _ in 0..2 {
            let ci = server.call_channel().recv().await.unwrap();
            server.exec(ci).await;
        }
        client.close().await;
        assert_eq!(sum.load(Ordering::SeqCst), 9);
        assert!(client.is_idle());
    });
}

#[rstest]
fn test_async_callback_panic_swallowed(runner: TestRunner) {
    runner.block_on(async move {
        let mut server = new_calc_server();
        let mut client = server.open(2);

        client.async_call("nop", vargs![], Callback::void(|_| panic!("callback boom")));
        let ci = server.call_channel().recv().await.unwrap();
        server.exec(ci).await;

        let ri = client.async_return_channel().recv().await.unwrap();
        client.cb(ri);
        // the bookkeeping survived the callback panic
        assert!(client.is_idle());

        // and the client still works
        let sent = Arc::new(AtomicUsize::new(0));
        let s = sent.clone();
        client.async_call(
            "nop",
            vargs![],
            Callback::void(move |r| {
                r.unwrap();
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let ci = server.call_channel().recv().await.unwrap();
        server.exec(ci).await;
        client.close().await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    });
}
