#![allow(non_snake_case)]

use super::*;
use crate::{
    error::ProtocolError,
    ports::MockEventRouter,
    protocol::GraphqlTransportWs,
    router::SubscriptionEventRouter,
    test_helpers::{
        ChannelConnection,
        ConnectionHandle,
        FakeRuntime,
        Order,
        OrdersSchema,
        wait_until,
    },
    types::ExecutionResult,
};
use pretty_assertions::assert_eq;
use serde_json::{
    Value,
    json,
};
use std::time::Duration;
use tokio::task::JoinHandle;

type Proxy = ClientProxy<OrdersSchema, GraphqlTransportWs>;

fn quiet_config() -> ClientConfig {
    ClientConfig {
        keep_alive_interval: None,
        initialization_timeout: None,
        max_subscriptions: None,
    }
}

fn proxy(
    router: Arc<dyn EventRouter>,
    runtime: Arc<FakeRuntime>,
    config: ClientConfig,
) -> (Proxy, ConnectionHandle) {
    let (connection, handle) = ChannelConnection::pair();
    let proxy = ClientProxy::new(ClientParams {
        schema: Arc::new(OrdersSchema::default()),
        protocol: GraphqlTransportWs,
        connection,
        router,
        schema_map: Arc::new(EventSchemaMap::new()),
        runtime,
        security: SecurityContext::for_user("alice"),
        config,
    });
    (proxy, handle)
}

struct Connected {
    proxy: Proxy,
    handle: ConnectionHandle,
    router: Arc<SubscriptionEventRouter>,
    run: JoinHandle<Result<(), Error>>,
}

/// Starts the proxy and completes the `connection_init` handshake.
async fn connected(config: ClientConfig) -> Connected {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, mut handle) = proxy(router.clone(), Arc::new(FakeRuntime::new()), config);
    let run = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.run().await })
    };
    handle.send_json(&json!({"type": "connection_init"}));
    assert_eq!(handle.recv_json().await, Some(json!({"type": "connection_ack"})));
    Connected {
        proxy,
        handle,
        router,
        run,
    }
}

async fn subscribe(connected: &mut Connected, id: &str, field: &str) {
    let expected = connected.proxy.subscription_count() + 1;
    connected.handle.send_json(&json!({
        "type": "subscribe",
        "id": id,
        "payload": {"query": format!("subscription {{ {field} {{ id }} }}")},
    }));
    let proxy = connected.proxy.clone();
    assert!(wait_until(|| proxy.subscription_count() == expected).await);
}

fn order_event(data: Value) -> Arc<SubscriptionEvent> {
    Arc::new(
        SubscriptionEvent::new::<OrdersSchema>("orderCreated", data).with_data_type::<Order>(),
    )
}

fn subscription_query(field: &str) -> QueryData {
    QueryData::new(format!("subscription {{ {field} {{ id }} }}"))
}

#[tokio::test]
async fn execute_query__second_subscription_on_same_event_does_not_touch_router() {
    // given
    let mut router = MockEventRouter::new();
    router.expect_add_client().times(1).return_const(());
    router.expect_remove_client().times(1).return_const(());
    let (proxy, _handle) = proxy(
        Arc::new(router),
        Arc::new(FakeRuntime::new()),
        quiet_config(),
    );

    // when
    let first = proxy.execute_query("1", subscription_query("orderCreated")).await;
    let second = proxy.execute_query("2", subscription_query("orderCreated")).await;
    let released_first = proxy.release_subscription("1");
    let released_second = proxy.release_subscription("2");

    // then
    assert_eq!(first, QueryOutcome::SubscriptionRegistered);
    assert_eq!(second, QueryOutcome::SubscriptionRegistered);
    assert!(released_first && released_second);
    assert_eq!(proxy.subscription_count(), 0);
}

#[tokio::test]
async fn execute_query__registers_the_client_for_the_field_event() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) =
        proxy(router.clone(), Arc::new(FakeRuntime::new()), quiet_config());

    // when
    let outcome = proxy
        .execute_query("1", subscription_query("orderShipped"))
        .await;

    // then
    assert_eq!(outcome, QueryOutcome::SubscriptionRegistered);
    assert!(router.is_registered(proxy.id(), &EventName::of::<OrdersSchema>("OrderShipped")));
    assert_eq!(proxy.subscription_count(), 1);
}

#[tokio::test]
async fn execute_query__duplicate_id_is_rejected() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());
    proxy
        .execute_query("1", subscription_query("orderCreated"))
        .await;

    // when
    let outcome = proxy.execute_query("1", subscription_query("orderNotes")).await;

    // then
    assert_eq!(outcome, QueryOutcome::DuplicateId);
    assert_eq!(proxy.subscription_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn execute_query__concurrent_requests_for_one_id_admit_exactly_one() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let runtime = Arc::new(FakeRuntime::with_delay(Duration::from_millis(50)));
    let (proxy, _handle) = proxy(router, runtime.clone(), quiet_config());

    // when
    let (first, second) = tokio::join!(
        proxy.execute_query("1", subscription_query("orderCreated")),
        proxy.execute_query("1", subscription_query("orderCreated")),
    );

    // then
    let mut outcomes = vec![first, second];
    outcomes.sort_by_key(|outcome| outcome == &QueryOutcome::DuplicateId);
    assert_eq!(
        outcomes,
        vec![QueryOutcome::SubscriptionRegistered, QueryOutcome::DuplicateId]
    );
    assert_eq!(runtime.executions(), 1);
    assert_eq!(proxy.subscription_count(), 1);
}

#[tokio::test]
async fn execute_query__single_operation_returns_its_result_and_frees_the_id() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) =
        proxy(router.clone(), Arc::new(FakeRuntime::new()), quiet_config());

    // when
    let outcome = proxy.execute_query("1", QueryData::new("{ orders }")).await;
    let reused = proxy.execute_query("1", QueryData::new("{ orders }")).await;

    // then
    let expected = QueryOutcome::SingleOperationCompleted(ExecutionResult::data(
        json!({"echo": "{ orders }"}),
    ));
    assert_eq!(outcome, expected);
    assert_eq!(reused, expected);
    assert_eq!(router.client_count(), 0);
}

#[tokio::test]
async fn execute_query__invalid_subscription_reports_messages() {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) =
        proxy(router.clone(), Arc::new(FakeRuntime::new()), quiet_config());

    let outcome = proxy
        .execute_query("1", QueryData::new("subscription { orderCreated invalid }"))
        .await;

    assert_eq!(
        outcome,
        QueryOutcome::InvalidSubscription(vec![GraphMessage::error(
            "The subscription is invalid"
        )])
    );
    assert_eq!(proxy.subscription_count(), 0);
    assert_eq!(router.client_count(), 0);
}

#[tokio::test]
async fn execute_query__field_without_event_is_invalid() {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());

    let outcome = proxy
        .execute_query("1", subscription_query("orderDeleted"))
        .await;

    assert!(matches!(outcome, QueryOutcome::InvalidSubscription(_)));
}

#[tokio::test]
async fn execute_query__runtime_failure_is_an_operation_failure() {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());

    let outcome = proxy.execute_query("1", QueryData::new("{ explode }")).await;

    assert_eq!(
        outcome,
        QueryOutcome::OperationFailure(vec![GraphMessage::error("the runtime exploded")])
    );
}

#[tokio::test]
async fn execute_query__limit_is_enforced() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let config = ClientConfig {
        max_subscriptions: Some(1),
        ..quiet_config()
    };
    let (proxy, _handle) = proxy(router, Arc::new(FakeRuntime::new()), config);

    // when
    let first = proxy
        .execute_query("1", subscription_query("orderCreated"))
        .await;
    let second = proxy.execute_query("2", subscription_query("orderNotes")).await;
    proxy.release_subscription("1");
    let third = proxy.execute_query("3", subscription_query("orderNotes")).await;

    // then
    assert_eq!(first, QueryOutcome::SubscriptionRegistered);
    assert_eq!(second, QueryOutcome::SubscriptionLimitReached);
    assert_eq!(third, QueryOutcome::SubscriptionRegistered);
}

#[tokio::test]
async fn release_subscription__unknown_id_returns_false() {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());

    assert!(!proxy.release_subscription("missing"));
}

#[tokio::test]
async fn dispose__unregisters_everything_and_refuses_new_subscriptions() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, _handle) =
        proxy(router.clone(), Arc::new(FakeRuntime::new()), quiet_config());
    for (id, field) in [("1", "orderCreated"), ("2", "orderShipped")] {
        proxy.execute_query(id, subscription_query(field)).await;
    }

    // when
    proxy.dispose();
    proxy.dispose();
    let after_dispose = proxy
        .execute_query("3", subscription_query("orderNotes"))
        .await;

    // then
    assert_eq!(proxy.state(), ConnectionState::Closed);
    assert_eq!(proxy.subscription_count(), 0);
    assert_eq!(router.client_count(), 0);
    assert_eq!(router.event_count(), 0);
    assert!(matches!(after_dispose, QueryOutcome::OperationFailure(_)));
}

#[tokio::test]
async fn receive_event__sends_results_only_to_matching_subscriptions() {
    // given
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;
    subscribe(&mut connected, "2", "orderNotes").await;

    // when
    connected
        .proxy
        .receive_event(order_event(json!({"id": 1, "total": 10})))
        .await
        .unwrap();

    // then
    assert_eq!(
        connected.handle.recv_json().await,
        Some(json!({
            "type": "next",
            "id": "1",
            "payload": {"data": {"orderCreated": {"id": 1, "total": 10}}},
        }))
    );
    assert_eq!(connected.handle.try_recv_json(), None);
}

#[tokio::test]
async fn receive_event__events_the_client_cannot_use_are_ignored() {
    // given
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;
    struct OtherSchema;
    let foreign = SubscriptionEvent::new::<OtherSchema>("orderCreated", json!({}))
        .with_data_type::<Order>();
    let untyped = SubscriptionEvent::new::<OrdersSchema>("orderCreated", json!({}));
    let unknown = SubscriptionEvent::new::<OrdersSchema>("orderDeleted", json!({}));

    // when
    for event in [foreign, untyped, unknown] {
        connected.proxy.receive_event(Arc::new(event)).await.unwrap();
    }

    // then
    assert_eq!(connected.handle.try_recv_json(), None);
}

#[tokio::test]
async fn receive_event__skip_suppresses_the_message() {
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;

    connected
        .proxy
        .receive_event(order_event(json!({"id": 1, "skip": true})))
        .await
        .unwrap();

    assert_eq!(connected.handle.try_recv_json(), None);
    assert_eq!(connected.proxy.subscription_count(), 1);
}

#[tokio::test]
async fn receive_event__complete_sends_completion_and_releases() {
    // given
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;

    // when
    connected
        .proxy
        .receive_event(order_event(json!({"id": 1, "complete": true, "skip": true})))
        .await
        .unwrap();

    // then
    assert_eq!(
        connected.handle.recv_json().await,
        Some(json!({"type": "complete", "id": "1"}))
    );
    assert_eq!(connected.proxy.subscription_count(), 0);
    assert_eq!(connected.router.client_count(), 0);
}

#[tokio::test]
async fn receive_event__after_disconnect_is_a_no_op() {
    // given
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;
    connected.handle.disconnect();

    // when
    let result = connected
        .proxy
        .receive_event(order_event(json!({"id": 1})))
        .await;

    // then
    assert!(result.is_ok());
    assert_eq!(connected.handle.try_recv_json(), None);
}

#[tokio::test]
async fn receive_event__disconnect_during_execution_is_a_no_op() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let runtime = Arc::new(FakeRuntime::with_delay(Duration::from_millis(50)));
    let (proxy, mut handle) = proxy(router, runtime, quiet_config());
    let _run = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.run().await })
    };
    handle.send_json(&json!({"type": "connection_init"}));
    assert_eq!(handle.recv_json().await, Some(json!({"type": "connection_ack"})));
    handle.send_json(&json!({
        "type": "subscribe",
        "id": "1",
        "payload": {"query": "subscription { orderCreated { id } }"},
    }));
    assert!(wait_until(|| proxy.subscription_count() == 1).await);

    // when
    let delivery = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.receive_event(order_event(json!({"id": 1}))).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.disconnect();
    let result = delivery.await.unwrap();

    // then
    assert!(result.is_ok());
    assert_eq!(handle.try_recv_json(), None);
}

#[tokio::test]
async fn receive_event__send_failure_is_reported() {
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;
    connected.handle.connection().fail_sends(true);

    let result = connected
        .proxy
        .receive_event(order_event(json!({"id": 1})))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn run__client_close_disposes_the_proxy() {
    // given
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;

    // when
    connected.handle.send_close();
    let result = connected.run.await.unwrap();

    // then
    assert!(result.is_ok());
    assert_eq!(connected.proxy.state(), ConnectionState::Closed);
    assert_eq!(connected.router.client_count(), 0);
}

#[tokio::test]
async fn run__refuses_a_transport_that_is_closed_forever() {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());
    handle.disconnect();

    let result = proxy.run().await;

    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test(start_paused = true)]
async fn run__initialization_timeout_closes_with_4408() {
    // given
    let router = Arc::new(SubscriptionEventRouter::new());
    let config = ClientConfig {
        initialization_timeout: Some(Duration::from_secs(3)),
        ..quiet_config()
    };
    let (proxy, handle) = proxy(router, Arc::new(FakeRuntime::new()), config);

    // when
    let result = proxy.run().await;

    // then
    assert!(result.is_ok());
    let (status, _) = handle.connection().close_frame().unwrap();
    assert_eq!(status.code(), 4408);
    assert_eq!(proxy.state(), ConnectionState::Closed);
}

/// Echoes JSON values and keeps every default hook.
struct PlainJson;

#[async_trait::async_trait]
impl ClientProtocol for PlainJson {
    const NAME: &'static str = "plain-json";

    type Message = Value;

    fn deserialize_message(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    fn serialize_message(&self, message: &Value) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::Encoding)
    }

    fn create_data_message(&self, subscription_id: &str, result: &ExecutionResult) -> Value {
        json!({"id": subscription_id, "result": result})
    }

    fn create_complete_message(&self, _: &str) -> Option<Value> {
        None
    }

    async fn on_client_message<S: GraphSchema>(
        &self,
        _: &ClientProxy<S, Self>,
        _: Value,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn run__initialization_timeout_keeps_the_connection_by_default() {
    // given
    let (connection, handle) = ChannelConnection::pair();
    let proxy = ClientProxy::new(ClientParams {
        schema: Arc::new(OrdersSchema::default()),
        protocol: PlainJson,
        connection,
        router: Arc::new(SubscriptionEventRouter::new()),
        schema_map: Arc::new(EventSchemaMap::new()),
        runtime: Arc::new(FakeRuntime::new()),
        security: SecurityContext::for_user("alice"),
        config: ClientConfig {
            initialization_timeout: Some(Duration::from_secs(3)),
            ..quiet_config()
        },
    });
    let run = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.run().await })
    };

    // when
    tokio::time::sleep(Duration::from_secs(10)).await;

    // then
    assert!(!proxy.is_initialized());
    assert_eq!(proxy.state(), ConnectionState::Open);
    assert_eq!(handle.connection().close_frame(), None);
    handle.send_close();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn run__initialized_client_is_not_timed_out() {
    // given
    let config = ClientConfig {
        initialization_timeout: Some(Duration::from_secs(3)),
        ..quiet_config()
    };
    let connected = connected(config).await;

    // when
    tokio::time::sleep(Duration::from_secs(10)).await;

    // then
    assert_eq!(connected.proxy.state(), ConnectionState::Open);
    assert_eq!(connected.handle.connection().close_frame(), None);
}

#[tokio::test(start_paused = true)]
async fn run__keep_alive_sends_pings() {
    // given
    let config = ClientConfig {
        keep_alive_interval: Some(Duration::from_secs(1)),
        ..quiet_config()
    };
    let mut connected = connected(config).await;

    // when
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // then
    assert_eq!(connected.handle.try_recv_json(), Some(json!({"type": "ping"})));
    assert_eq!(connected.handle.try_recv_json(), Some(json!({"type": "ping"})));
    assert_eq!(connected.handle.try_recv_json(), None);
}

#[tokio::test]
async fn protocol__ping_is_answered_with_pong() {
    let mut connected = connected(quiet_config()).await;

    connected.handle.send_json(&json!({"type": "ping"}));

    assert_eq!(connected.handle.recv_json().await, Some(json!({"type": "pong"})));
}

#[tokio::test]
async fn protocol__complete_message_releases_the_subscription() {
    let mut connected = connected(quiet_config()).await;
    subscribe(&mut connected, "1", "orderCreated").await;

    connected
        .handle
        .send_json(&json!({"type": "complete", "id": "1"}));

    let proxy = connected.proxy.clone();
    assert!(wait_until(|| proxy.subscription_count() == 0).await);
    assert_eq!(connected.router.client_count(), 0);
}

#[tokio::test]
async fn protocol__query_over_subscribe_returns_next_and_complete() {
    let mut connected = connected(quiet_config()).await;

    connected.handle.send_json(&json!({
        "type": "subscribe",
        "id": "q",
        "payload": {"query": "{ orders }"},
    }));

    assert_eq!(
        connected.handle.recv_json().await,
        Some(json!({"type": "next", "id": "q", "payload": {"data": {"echo": "{ orders }"}}}))
    );
    assert_eq!(
        connected.handle.recv_json().await,
        Some(json!({"type": "complete", "id": "q"}))
    );
}

#[tokio::test]
async fn protocol__invalid_subscription_returns_error_message() {
    let mut connected = connected(quiet_config()).await;

    connected.handle.send_json(&json!({
        "type": "subscribe",
        "id": "1",
        "payload": {"query": "subscription { orderCreated invalid }"},
    }));

    assert_eq!(
        connected.handle.recv_json().await,
        Some(json!({
            "type": "error",
            "id": "1",
            "payload": [{"message": "The subscription is invalid"}],
        }))
    );
    assert_eq!(connected.proxy.state(), ConnectionState::Open);
}

async fn close_code_after(messages: Vec<Value>, initialize: bool) -> u16 {
    let router = Arc::new(SubscriptionEventRouter::new());
    let (proxy, handle) = proxy(router, Arc::new(FakeRuntime::new()), quiet_config());
    if initialize {
        handle.send_json(&json!({"type": "connection_init"}));
    }
    for message in messages {
        handle.send_json(&message);
    }
    proxy.run().await.unwrap();
    let (status, _) = handle.connection().close_frame().unwrap();
    status.code()
}

#[tokio::test]
async fn protocol__repeated_connection_init_closes_with_4429() {
    let code = close_code_after(vec![json!({"type": "connection_init"})], true).await;

    assert_eq!(code, 4429);
}

#[tokio::test]
async fn protocol__subscribe_before_init_closes_with_4401() {
    let subscribe = json!({
        "type": "subscribe",
        "id": "1",
        "payload": {"query": "subscription { orderCreated { id } }"},
    });

    let code = close_code_after(vec![subscribe], false).await;

    assert_eq!(code, 4401);
}

#[tokio::test]
async fn protocol__reused_subscription_id_closes_with_4409() {
    let subscribe = json!({
        "type": "subscribe",
        "id": "1",
        "payload": {"query": "subscription { orderCreated { id } }"},
    });

    let code = close_code_after(vec![subscribe.clone(), subscribe], true).await;

    assert_eq!(code, 4409);
}

#[tokio::test]
async fn protocol__malformed_message_closes_with_4400() {
    let code = close_code_after(vec![json!({"type": "start"})], true).await;

    assert_eq!(code, 4400);
}

#[tokio::test]
async fn protocol__server_message_from_client_closes_with_4400() {
    let code = close_code_after(vec![json!({"type": "connection_ack"})], true).await;

    assert_eq!(code, 4400);
}
