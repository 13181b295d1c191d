//! End-to-end runs of the flow executor against the mock session

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::mock_session::{MockConnector, MockSession};
use super::{fast_config, init_tracing, SHORT};
use crate::click_strategies::ClickChain;
use crate::events::{BroadcastEventBus, FlowEvent};
use crate::executor::{ExecutionContext, FlowExecutor, FlowOutcome, OutcomeStatus};
use crate::flow::{ActionType, Flow, Step};
use crate::platforms::{AutomationSession, SessionConnector};
use crate::products::Product;
use crate::recovery::Resolution;
use crate::selector::Selector;
use crate::setup::{initialize, InitRequest, InitStatus};

struct Harness {
    executor: FlowExecutor,
    ctx: Arc<ExecutionContext>,
    bus: BroadcastEventBus,
}

fn build(ctx: ExecutionContext, bus: BroadcastEventBus) -> Harness {
    let ctx = Arc::new(ctx.with_click_chain(
        ClickChain::standard().with_settle_delay(Duration::from_millis(1)),
    ));
    Harness {
        executor: FlowExecutor::new(ctx.clone()),
        ctx,
        bus,
    }
}

fn with_session(session: &Arc<MockSession>) -> Harness {
    init_tracing();
    let bus = BroadcastEventBus::default();
    let session: Arc<dyn AutomationSession> = session.clone();
    build(
        ExecutionContext::new(Arc::new(bus.clone())).with_session(session),
        bus,
    )
}

fn click(name: &str) -> Step {
    Step::new(ActionType::Click, name).with_selector(&Selector::name(name))
}

fn flow(steps: Vec<Step>) -> Flow {
    let mut flow = Flow::new("venta", steps);
    flow.config = fast_config();
    flow
}

async fn next_failure(rx: &mut broadcast::Receiver<FlowEvent>) -> Value {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(FlowEvent::Status { status, data }) if status == "step_failed" => return data,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no step_failed event")
}

fn spawn_run(h: &Harness, flow: Flow) -> tokio::task::JoinHandle<FlowOutcome> {
    let executor = h.executor.clone();
    tokio::spawn(async move { executor.run(flow).await })
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_steps_are_not_dispatched() {
    let session = Arc::new(
        MockSession::new()
            .with_element(Selector::name("a"), "a")
            .with_element(Selector::name("b"), "b")
            .with_element(Selector::name("c"), "c")
            .with_element(Selector::name("d"), "d")
            .with_element(Selector::name("e"), "e"),
    );
    let h = with_session(&session);

    let outcome = h
        .executor
        .run(flow(vec![
            click("a"),
            click("b"),
            click("c").disabled(),
            click("d"),
            click("e"),
        ]))
        .await;
    assert_eq!(outcome, FlowOutcome::completed(4));
    assert_eq!(session.count("click:"), 4);
    assert_eq!(session.count("click:c"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn found_on_last_attempt_raises_no_failure() {
    let session = Arc::new(MockSession::new().with_element_after(Selector::name("a"), "a", 2));
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let outcome = h.executor.run(flow(vec![click("a")])).await;
    assert_eq!(outcome.status, OutcomeStatus::Completed);

    while let Ok(event) = rx.try_recv() {
        assert_ne!(event.status_name(), Some("step_failed"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_with_corrected_selector_reruns_same_step() {
    let session = Arc::new(
        MockSession::new()
            .with_element(Selector::name("Agregar"), "add")
            .with_element(Selector::name("Aceptar"), "ok"),
    );
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let run = spawn_run(&h, flow(vec![click("Agregarr"), click("Aceptar")]));
    let failure = next_failure(&mut rx).await;
    assert_eq!(failure["step_index"], 0);
    assert_eq!(failure["selector_value"], "Agregarr");
    assert!(h.ctx.is_awaiting_resolution());
    assert!(h.ctx.deliver_resolution(Resolution::retry_with("name", "Agregar")));

    let outcome = run.await.unwrap();
    assert_eq!(outcome, FlowOutcome::completed(2));
    assert_eq!(session.lookups_of(&Selector::name("Agregarr")), 3);
    assert_eq!(session.count("click:add"), 1);
    assert_eq!(session.count("click:ok"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_moves_past_the_failed_step() {
    let session = Arc::new(
        MockSession::new()
            .with_element(Selector::name("a"), "a")
            .with_element(Selector::name("c"), "c"),
    );
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let run = spawn_run(&h, flow(vec![click("a"), click("missing"), click("c")]));
    let failure = next_failure(&mut rx).await;
    assert_eq!(failure["step_index"], 1);
    h.ctx.deliver_resolution(Resolution::skip());

    let outcome = run.await.unwrap();
    assert_eq!(outcome, FlowOutcome::completed(3));
    assert_eq!(session.count("click:c"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_stop_reports_failed_step() {
    let session = Arc::new(MockSession::new().with_element(Selector::name("a"), "a"));
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let run = spawn_run(&h, flow(vec![click("a"), click("missing"), click("a")]));
    next_failure(&mut rx).await;
    h.ctx.deliver_resolution(Resolution::stop());

    let outcome = run.await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Stopped);
    assert_eq!(outcome.failed_step, Some(1));
    assert_eq!(session.count("click:a"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_failure_times_out_as_error() {
    let session = Arc::new(MockSession::new());
    let h = with_session(&session);
    let mut steps = flow(vec![click("missing")]);
    steps.config.recovery_timeout = 50;

    let outcome = h.executor.run(steps).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.failed_step, Some(0));
    assert_eq!(
        outcome.error.as_deref(),
        Some("Timeout waiting for operator response")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_while_waiting_for_operator() {
    let session = Arc::new(MockSession::new());
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let run = spawn_run(&h, flow(vec![click("missing")]));
    next_failure(&mut rx).await;
    h.ctx.request_stop();

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run ignored the stop")
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Stopped);
    assert_eq!(outcome.failed_step, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_is_rejected_while_one_is_active() {
    let session = Arc::new(MockSession::new());
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();

    let run = spawn_run(&h, flow(vec![click("missing")]));
    next_failure(&mut rx).await;

    let rejected = h.executor.run(flow(vec![click("a")])).await;
    assert_eq!(rejected.status, OutcomeStatus::Error);
    assert_eq!(rejected.error.as_deref(), Some("A flow is already running"));

    h.ctx.deliver_resolution(Resolution::stop());
    assert_eq!(run.await.unwrap().status, OutcomeStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn iterations_restart_from_the_first_step() {
    let session = Arc::new(
        MockSession::new()
            .with_element(Selector::name("a"), "a")
            .with_element(Selector::name("b"), "b")
            .with_element(Selector::name("c"), "c"),
    );
    let h = with_session(&session);
    let mut steps = flow(vec![click("a"), click("b"), click("c")]);
    steps.iterations = 2;
    steps.start_from_step = 1;

    let outcome = h.executor.run(steps).await;
    assert_eq!(outcome, FlowOutcome::completed(5));
    assert_eq!(session.count("click:a"), 1);
    assert_eq!(session.count("click:b"), 2);
    assert_eq!(session.count("click:c"), 2);
}

fn pos_session() -> Arc<MockSession> {
    Arc::new(
        MockSession::new()
            .with_element(Selector::name("Buscar producto"), "search")
            .with_element(Selector::name("Agregar"), "add"),
    )
}

fn search_step() -> Step {
    Step::new(ActionType::SearchProduct, "Agregar productos")
        .with_selector(&Selector::name("Buscar producto"))
        .with_value("{{products}}")
}

fn searched_codes(session: &MockSession) -> Vec<String> {
    session
        .calls()
        .iter()
        .filter_map(|c| c.strip_prefix("send_text:search="))
        .map(|text| text.trim_end_matches('\u{E007}').to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_draws_a_subset_of_products() {
    let session = pos_session();
    let h = with_session(&session);
    let mut steps = flow(vec![search_step()]);
    steps.config.products = (1..=5).map(|i| Product::new(format!("P{i}"), 1)).collect();
    steps.config.products_per_iteration = 2;

    let outcome = h.executor.run(steps).await;
    assert_eq!(outcome, FlowOutcome::completed(1));

    let codes = searched_codes(&session);
    assert_eq!(codes.len(), 2);
    assert_ne!(codes[0], codes[1]);
    assert!(codes.iter().all(|c| c.starts_with('P')));
    assert_eq!(session.count("click:add"), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_takes_every_product_once_when_list_is_short() {
    let session = pos_session();
    let h = with_session(&session);
    let mut steps = flow(vec![search_step()]);
    steps.config.products = vec![
        Product::new("7501", 3),
        Product::new("7502", 1),
        Product::new("7503", 2),
    ];
    steps.config.products_per_iteration = 10;

    let outcome = h.executor.run(steps).await;
    assert_eq!(outcome, FlowOutcome::completed(1));
    assert_eq!(searched_codes(&session), vec!["7501", "7502", "7503"]);
    assert_eq!(session.count("click:add"), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_uses_products_loaded_at_initialization() {
    let session = pos_session();
    let h = with_session(&session);
    h.ctx.set_products(vec![Product::new("9001", 1)]).await;

    let outcome = h.executor.run(flow(vec![search_step()])).await;
    assert_eq!(outcome, FlowOutcome::completed(1));
    assert_eq!(searched_codes(&session), vec!["9001"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn recommendation_prompt_is_dismissed_after_every_unit() {
    let session = pos_session();
    let batch = fast_config().batch;
    session.add_element(batch.upsell_prompt, "upsell", 0);
    session.add_element(batch.accept_button, "ok", 0);
    let h = with_session(&session);
    let mut steps = flow(vec![search_step()]);
    steps.config.products = vec![Product::new("7501", 2)];

    let outcome = h.executor.run(steps).await;
    assert_eq!(outcome, FlowOutcome::completed(1));

    let calls = session.calls();
    let searched = calls
        .iter()
        .position(|c| c.starts_with("send_text:search="))
        .expect("product was never searched");
    let clicks: Vec<&str> = calls[searched..]
        .iter()
        .map(String::as_str)
        .filter(|c| *c == "click:add" || *c == "click:ok")
        .collect();
    assert_eq!(clicks, vec!["click:add", "click:ok", "click:add", "click:ok"]);
}

async fn wait_for_adds(session: &MockSession, adds: usize) {
    let wait = async {
        while session.count("click:add") < adds {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("batch never clicked add");
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_interrupts_a_long_batch() {
    let session = pos_session();
    let h = with_session(&session);
    let mut steps = flow(vec![search_step()]);
    steps.config.products = vec![Product::new("7501", 50)];
    steps.config.settle_delay = 20;

    let run = spawn_run(&h, steps);
    wait_for_adds(&session, 1).await;
    h.ctx.request_stop();

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("batch ignored the stop")
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Stopped);
    assert_eq!(outcome.failed_step, Some(0));
    assert!(session.count("click:add") < 50);
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_holds_a_batch_between_units() {
    let session = pos_session();
    let h = with_session(&session);
    let mut steps = flow(vec![search_step()]);
    steps.config.products = vec![Product::new("7501", 5)];
    steps.config.settle_delay = 20;

    let run = spawn_run(&h, steps);
    wait_for_adds(&session, 1).await;
    h.ctx.pause();
    // Let a unit already past its checkpoint finish.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let held = session.count("click:add");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.count("click:add"), held);
    assert!(held < 5);

    h.ctx.resume();
    let outcome = run.await.unwrap();
    assert_eq!(outcome, FlowOutcome::completed(1));
    assert_eq!(session.count("click:add"), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_search_field_fails_the_batch_step() {
    let session = Arc::new(MockSession::new());
    let h = with_session(&session);
    let mut rx = h.bus.subscribe();
    let mut steps = flow(vec![search_step()]);
    steps.config.products = vec![Product::new("7501", 1)];

    let run = spawn_run(&h, steps);
    let failure = next_failure(&mut rx).await;
    assert!(failure["error"]
        .as_str()
        .unwrap_or_default()
        .contains("Buscar producto"));
    h.ctx.deliver_resolution(Resolution::stop());
    assert_eq!(run.await.unwrap().status, OutcomeStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_session_is_replaced_before_the_run() {
    init_tracing();
    let stale = Arc::new(MockSession::new());
    stale.kill();
    let fresh = Arc::new(MockSession::new().with_element(Selector::name("a"), "a"));
    let connector = Arc::new(MockConnector::new(fresh.clone()));

    let bus = BroadcastEventBus::default();
    let stale_dyn: Arc<dyn AutomationSession> = stale.clone();
    let connector_dyn: Arc<dyn SessionConnector> = connector.clone();
    let h = build(
        ExecutionContext::new(Arc::new(bus.clone()))
            .with_session(stale_dyn)
            .with_connector(connector_dyn),
        bus,
    );

    let outcome = h.executor.run(flow(vec![click("a")])).await;
    assert_eq!(outcome, FlowOutcome::completed(1));
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(fresh.count("click:a"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_reconnect_ends_the_run_with_error() {
    init_tracing();
    let bus = BroadcastEventBus::default();
    let connector: Arc<dyn SessionConnector> = Arc::new(MockConnector::failing());
    let h = build(
        ExecutionContext::new(Arc::new(bus.clone())).with_connector(connector),
        bus,
    );

    let outcome = h.executor.run(flow(vec![click("a")])).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.failed_step, None);
    assert!(!h.ctx.control().is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_holds_the_run_until_resume() {
    let session = Arc::new(
        MockSession::new()
            .with_element(Selector::name("a"), "a")
            .with_element(Selector::name("b"), "b"),
    );
    let h = with_session(&session);
    let mut steps = flow(vec![click("a"), Step::new(ActionType::Wait, "espera"), click("b")]);
    steps.steps[1].wait_time = Some(100);

    let run = spawn_run(&h, steps);
    tokio::time::sleep(SHORT).await;
    h.ctx.pause();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.count("click:b"), 0);

    h.ctx.resume();
    let outcome = run.await.unwrap();
    assert_eq!(outcome, FlowOutcome::completed(3));
    assert_eq!(session.count("click:b"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_connects_clears_order_and_loads_products() {
    init_tracing();
    let session = Arc::new(MockSession::new().with_element(Selector::name("Borrar pedido"), "clear"));
    let connector = Arc::new(MockConnector::new(session.clone()));
    let bus = BroadcastEventBus::default();
    let connector_dyn: Arc<dyn SessionConnector> = connector.clone();
    let ctx = ExecutionContext::new(Arc::new(bus.clone())).with_connector(connector_dyn);
    let mut rx = bus.subscribe();

    let request = InitRequest {
        products: vec![Product::new("7501", 2), Product::new("7502", 1)],
        ..InitRequest::default()
    };
    let report = initialize(&ctx, &request).await;

    assert_eq!(report.status, InitStatus::Success);
    let steps: Vec<&str> = report.results.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(
        steps,
        vec!["check_driver", "connect", "clear_order", "load_products"]
    );
    assert_eq!(report.results[3].count, Some(2));
    assert_eq!(ctx.loaded_products().await.len(), 2);
    assert_eq!(session.count("click:clear"), 1);
    assert_eq!(connector.connect_count(), 1);

    let mut announced = 0;
    while let Ok(event) = rx.try_recv() {
        if event.status_name() == Some("init_step") {
            announced += 1;
        }
    }
    // running + success for each of the four steps
    assert_eq!(announced, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_reads_the_products_file() {
    init_tracing();
    let path = std::env::temp_dir().join(format!("posflow-init-{}.txt", std::process::id()));
    std::fs::write(&path, "7501, 2\n7502\n7503, 4\n").unwrap();

    let session = Arc::new(MockSession::new());
    let connector: Arc<dyn SessionConnector> = Arc::new(MockConnector::new(session));
    let ctx = ExecutionContext::new(Arc::new(BroadcastEventBus::default())).with_connector(connector);
    let request = InitRequest {
        products_file: Some(path.display().to_string()),
        ..InitRequest::default()
    };
    let report = initialize(&ctx, &request).await;
    std::fs::remove_file(&path).unwrap();

    assert_eq!(report.status, InitStatus::Success);
    assert_eq!(report.results[3].count, Some(3));
    assert_eq!(
        ctx.loaded_products().await,
        vec![
            Product::new("7501", 2),
            Product::new("7502", 1),
            Product::new("7503", 4),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_stops_at_the_failing_step() {
    init_tracing();
    let bus = BroadcastEventBus::default();
    let connector: Arc<dyn SessionConnector> = Arc::new(MockConnector::failing());
    let ctx = ExecutionContext::new(Arc::new(bus)).with_connector(connector);

    let report = initialize(&ctx, &InitRequest::default()).await;
    assert_eq!(report.status, InitStatus::Error);
    assert_eq!(report.step.as_deref(), Some("connect"));
    assert_eq!(report.results.len(), 1);
}
