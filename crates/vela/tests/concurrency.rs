//! Structured concurrency through the engine: scopes, channels, timeouts,
//! atomics, and the failure-propagation rules.

mod common;

use common::*;
use vela::{ExcKind, Value, ops::BinOp};

#[test]
fn channel_buffered_send_receive() {
    // val c = Channel(2); c.send(10); c.send(20); c.receive() + c.receive()
    let result = run_main(vec![
        val("c", call(ident("Channel"), vec![int(2)])),
        e(mcall(ident("c"), "send", vec![int(10)])),
        e(mcall(ident("c"), "send", vec![int(20)])),
        ret(bin(
            BinOp::Add,
            mcall(ident("c"), "receive", vec![]),
            mcall(ident("c"), "receive", vec![]),
        )),
    ]);
    assert_int(&result, 30);
}

#[test]
fn channel_try_receive_and_close() {
    let result = run_main(vec![
        val("c", call(ident("Channel"), vec![int(1)])),
        val("empty", mcall(ident("c"), "tryReceive", vec![])),
        e(mcall(ident("c"), "send", vec![int(5)])),
        e(mcall(ident("c"), "close", vec![])),
        // buffered value drains after close
        val("got", mcall(ident("c"), "receive", vec![])),
        ret(if_else(
            bin(BinOp::Eq, ident("empty"), null()),
            vec![e(ident("got"))],
            vec![e(int(-1))],
        )),
    ]);
    assert_int(&result, 5);
}

#[test]
fn receive_on_closed_empty_channel_raises() {
    let result = run_main(vec![
        val("c", call(ident("Channel"), vec![int(1)])),
        e(mcall(ident("c"), "close", vec![])),
        ret(mcall(ident("c"), "receive", vec![])),
    ]);
    assert_eq!(result.unwrap_err().kind, ExcKind::ChannelClosed);
}

#[test]
fn coroutine_scope_async_await() {
    // coroutineScope { val a = async { 1 }; val b = async { 2 };
    //                  a.await() + b.await() }
    let result = run_main(vec![ret(call(
        ident("coroutineScope"),
        vec![lambda(
            &[],
            vec![
                val("a", call(ident("async"), vec![lambda(&[], vec![e(int(1))])])),
                val("b", call(ident("async"), vec![lambda(&[], vec![e(int(2))])])),
                e(bin(
                    BinOp::Add,
                    mcall(ident("a"), "await", vec![]),
                    mcall(ident("b"), "await", vec![]),
                )),
            ],
        )],
    ))]);
    assert_int(&result, 3);
}

#[test]
fn strict_scope_propagates_first_child_failure() {
    // one child fails; join_all rethrows its error after joining
    let result = run_main(vec![ret(call(
        ident("coroutineScope"),
        vec![lambda(
            &[],
            vec![
                e(call(
                    ident("launch"),
                    vec![lambda(&[], vec![e(call(ident("error"), vec![s("child failed")]))])],
                )),
                e(int(0)),
            ],
        )],
    ))]);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ExcKind::UserThrown);
    assert_eq!(err.message.as_deref(), Some("child failed"));
}

#[test]
fn supervisor_scope_isolates_child_failure() {
    let result = run_main(vec![ret(call(
        ident("supervisorScope"),
        vec![lambda(
            &[],
            vec![
                e(call(
                    ident("launch"),
                    vec![lambda(&[], vec![e(call(ident("error"), vec![s("ignored")]))])],
                )),
                e(int(7)),
            ],
        )],
    ))]);
    assert_int(&result, 7);
}

#[test]
fn with_timeout_raises_on_slow_block() {
    // the block parks on an empty channel long enough to blow the window
    let result = run_main(vec![
        val("c", call(ident("Channel"), vec![int(1)])),
        ret(call(
            ident("withTimeout"),
            vec![
                int(40),
                lambda(&[], vec![e(mcall(ident("c"), "receiveTimeout", vec![int(2000)]))]),
            ],
        )),
    ]);
    assert_eq!(result.unwrap_err().kind, ExcKind::Timeout);
}

#[test]
fn with_timeout_passes_fast_blocks_through() {
    let result = run_main(vec![ret(call(
        ident("withTimeout"),
        vec![int(2000), lambda(&[], vec![e(int(11))])],
    ))]);
    assert_int(&result, 11);
}

#[test]
fn parallel_returns_results_in_order() {
    let result = run_main(vec![
        val(
            "results",
            call(
                ident("parallel"),
                vec![lambda(&[], vec![e(int(1))]), lambda(&[], vec![e(int(2))])],
            ),
        ),
        ret(bin(
            BinOp::Add,
            index(ident("results"), int(0)),
            bin(BinOp::Mul, index(ident("results"), int(1)), int(10)),
        )),
    ]);
    assert_int(&result, 21);
}

#[test]
fn await_all_joins_everything() {
    let result = run_main(vec![ret(call(
        ident("coroutineScope"),
        vec![lambda(
            &[],
            vec![
                val("a", call(ident("async"), vec![lambda(&[], vec![e(int(10))])])),
                val("b", call(ident("async"), vec![lambda(&[], vec![e(int(20))])])),
                val(
                    "all",
                    call(ident("awaitAll"), vec![list_lit(vec![ident("a"), ident("b")])]),
                ),
                e(bin(
                    BinOp::Add,
                    index(ident("all"), int(0)),
                    index(ident("all"), int(1)),
                )),
            ],
        )],
    ))]);
    assert_int(&result, 30);
}

#[test]
fn atomics_count_across_tasks() {
    // two launched tasks bump a shared atomic 100 times each
    let bump_loop = |_: ()| {
        lambda(
            &[],
            vec![
                var("i", int(0)),
                while_loop(
                    bin(BinOp::Lt, ident("i"), int(100)),
                    vec![
                        e(mcall(ident("counter"), "incrementAndGet", vec![])),
                        e(assign("i", bin(BinOp::Add, ident("i"), int(1)))),
                    ],
                ),
            ],
        )
    };
    let result = run_main(vec![
        val("counter", call(ident("AtomicInt"), vec![int(0)])),
        e(call(
            ident("coroutineScope"),
            vec![lambda(
                &[],
                vec![
                    e(call(ident("launch"), vec![bump_loop(())])),
                    e(call(ident("launch"), vec![bump_loop(())])),
                ],
            )],
        )),
        ret(mcall(ident("counter"), "get", vec![])),
    ]);
    assert_int(&result, 200);
}

#[test]
fn mutex_with_lock_returns_block_value() {
    let result = run_main(vec![
        val("m", call(ident("Mutex"), vec![])),
        ret(mcall(ident("m"), "withLock", vec![lambda(&[], vec![e(int(9))])])),
    ]);
    assert_int(&result, 9);
}

#[test]
fn run_catching_reifies_and_never_throws() {
    // runCatching { runCatching { error("x") } } is Ok(Err(...))
    let result = run_main(vec![
        val(
            "outer",
            call(
                ident("runCatching"),
                vec![lambda(
                    &[],
                    vec![e(call(
                        ident("runCatching"),
                        vec![lambda(&[], vec![e(call(ident("error"), vec![s("x")]))])],
                    ))],
                )],
            ),
        ),
        ret(if_else(
            mcall(ident("outer"), "isOk", vec![]),
            vec![e(mcall(member(ident("outer"), "value"), "isErr", vec![]))],
            vec![e(boolean(false))],
        )),
    ]);
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn result_unwrap_or_recovers() {
    let result = run_main(vec![
        val(
            "r",
            call(
                ident("runCatching"),
                vec![lambda(&[], vec![e(call(ident("error"), vec![s("nope")]))])],
            ),
        ),
        ret(mcall(ident("r"), "unwrapOr", vec![int(42)])),
    ]);
    assert_int(&result, 42);
}

#[test]
fn measure_time_returns_long() {
    let result = run_main(vec![ret(call(
        ident("measureTimeMillis"),
        vec![lambda(&[], vec![e(int(1))])],
    ))]);
    match result.unwrap() {
        Value::Long(ms) => assert!(ms >= 0),
        other => panic!("expected Long, got {other:?}"),
    }
}

#[test]
fn with_context_runs_on_dispatcher() {
    let result = run_main(vec![ret(call(
        ident("withContext"),
        vec![
            member(ident("Dispatchers"), "IO"),
            lambda(&[], vec![e(int(5))]),
        ],
    ))]);
    assert_int(&result, 5);
}

#[test]
fn channel_iteration_drains_until_close() {
    let result = run_main(vec![
        val("c", call(ident("Channel"), vec![int(3)])),
        e(mcall(ident("c"), "send", vec![int(1)])),
        e(mcall(ident("c"), "send", vec![int(2)])),
        e(mcall(ident("c"), "send", vec![int(3)])),
        e(mcall(ident("c"), "close", vec![])),
        var("total", int(0)),
        for_in(
            "v",
            ident("c"),
            vec![e(assign("total", bin(BinOp::Add, ident("total"), ident("v"))))],
        ),
        ret(ident("total")),
    ]);
    assert_int(&result, 6);
}

#[test]
fn task_limit_is_enforced() {
    let mut policy = vela::SecurityPolicy::unrestricted();
    policy.max_async_tasks = 1;
    // spawning two concurrent children trips the budget; the channel keeps
    // the first child alive until the second spawn has been attempted
    let (result, _) = run_script_with_policy(
        policy,
        Vec::new(),
        vec![
            val("gate", call(ident("Channel"), vec![int(0)])),
            val(
                "first",
                call(
                    ident("scope"),
                    vec![lambda(&[], vec![e(mcall(ident("gate"), "receiveTimeout", vec![int(2000)]))])],
                ),
            ),
            val(
                "second",
                call(ident("scope"), vec![lambda(&[], vec![e(int(2))])]),
            ),
            ret(int(0)),
        ],
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind, ExcKind::LoopLimit);
}
