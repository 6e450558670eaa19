use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use errand_client::{ClientContext, LoginResult, LoginWithCustomIdRequest};
use errand_config::{DeliveryMode, ServiceSettings, TransportConfig};
use errand_engine::{AsyncBlock, OpError, OperationTag};
use errand_queue::{QueueOptions, TaskQueue};
use errand_transport::HttpTransport;
use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Handle;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct ServerTime {
    time: String,
}

fn client(server: &MockServer, delivery: DeliveryMode) -> ClientContext {
    let transport = HttpTransport::new(&TransportConfig {
        delivery,
        connect_timeout: Duration::from_secs(5),
        request_timeout: Some(Duration::from_secs(10)),
        allow_insecure_http: true,
    })
    .unwrap();
    let settings = ServiceSettings::new("T1", &server.uri(), true).unwrap();
    ClientContext::new(settings, transport)
}

fn queue() -> TaskQueue {
    TaskQueue::new(QueueOptions::thread_pool(), Handle::current())
}

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 200, "status": "OK", "data": data}))
}

async fn mount_time(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/Client/GetTime"))
        .respond_with(envelope(json!({"Time": "2026-10-19T12:00:00Z"})))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_injects_title_and_authorizes_later_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Client/LoginWithCustomID"))
        .and(body_json(json!({
            "CustomId": "player-1",
            "CreateAccount": true,
            "TitleId": "T1"
        })))
        .respond_with(envelope(json!({
            "PlayFabId": "A1B2C3",
            "SessionTicket": "ticket-abc",
            "NewlyCreated": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/Client/GetTime"))
        .and(header("x-authorization", "ticket-abc"))
        .respond_with(envelope(json!({"Time": "2026-10-19T12:00:00Z"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, DeliveryMode::Threaded);
    let queue = queue();

    let block = AsyncBlock::new(&queue);
    client
        .login_with_custom_id(
            &block,
            &LoginWithCustomIdRequest::new("player-1").create_account(true),
        )
        .unwrap();
    block.wait_async().await.unwrap();

    let handle = block.get_result_handle().unwrap();
    let login = handle.get::<LoginResult>().unwrap();
    assert_eq!(login.player_id, "A1B2C3");
    assert!(login.newly_created);

    let user = client.user(login);
    assert_eq!(user.player_id(), "A1B2C3");

    let block = AsyncBlock::new(&queue);
    user.call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();
    block.wait_async().await.unwrap();
    let time = block.get_result_handle().unwrap();
    assert_eq!(
        time.get::<ServerTime>().unwrap().time,
        "2026-10-19T12:00:00Z"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typed_result_outlives_the_operation() {
    let server = MockServer::start().await;
    mount_time(&server).await;
    let client = client(&server, DeliveryMode::Threaded);

    let block = AsyncBlock::new(&queue());
    client
        .call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();
    block.wait_async().await.unwrap();

    let handle = block.get_result_handle().unwrap();
    assert_eq!(block.state(), OperationTag::Destroyed);
    assert!(matches!(block.get_result_handle(), Err(OpError::Usage(_))));
    drop(block);

    let shared = handle.downcast::<ServerTime>().unwrap();
    handle.close();
    assert_eq!(shared.time, "2026-10-19T12:00:00Z");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serialized_call_returns_data_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Client/GetTitleData"))
        .respond_with(envelope(json!({"Data": {"motd": "hello"}})))
        .mount(&server)
        .await;
    let client = client(&server, DeliveryMode::Threaded);

    let block = AsyncBlock::new(&queue());
    client
        .call_serialized(&block, "/Client/GetTitleData", r#"{"Keys":["motd"]}"#)
        .unwrap();
    block.wait_async().await.unwrap();

    let size = block.get_result_size().unwrap();
    assert!(matches!(
        block.get_result(&mut vec![0; size + 1]),
        Err(OpError::ResultSizeMismatch { .. })
    ));
    let mut buffer = vec![0; size];
    block.get_result(&mut buffer).unwrap();
    let data: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(data, json!({"Data": {"motd": "hello"}}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_failure_is_the_terminal_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 401,
            "status": "Unauthorized",
            "error": "NotAuthenticated",
            "errorCode": 1074,
            "errorMessage": "This API method requires a logged in player"
        })))
        .mount(&server)
        .await;
    let client = client(&server, DeliveryMode::Threaded);

    let block = AsyncBlock::new(&queue());
    client
        .call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();

    let status = block.wait_async().await;
    assert!(matches!(
        status,
        Err(OpError::Remote {
            http_code: 401,
            error_code: 1074,
            ..
        })
    ));
    assert_eq!(block.state(), OperationTag::Destroyed);
    assert_eq!(block.get_result_handle().unwrap_err(), status.unwrap_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_data_fails_with_deserialize() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(envelope(json!({"Unrelated": 1})))
        .mount(&server)
        .await;
    let client = client(&server, DeliveryMode::Threaded);

    let block = AsyncBlock::new(&queue());
    client
        .call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();
    assert!(matches!(
        block.wait_async().await,
        Err(OpError::Deserialize(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_path_fails_synchronously() {
    let server = MockServer::start().await;
    let client = client(&server, DeliveryMode::Threaded);

    let block = AsyncBlock::new(&queue());
    let err = client
        .call::<ServerTime, _>(&block, "Client/GetTime", &json!({}))
        .unwrap_err();
    assert!(matches!(err, OpError::InvalidArgument(_)));
    assert_eq!(block.get_status(false), Err(err));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polled_delivery_completes_through_update() {
    let server = MockServer::start().await;
    mount_time(&server).await;
    let client = client(&server, DeliveryMode::Polled);
    let callbacks = Arc::new(AtomicUsize::new(0));

    let block = AsyncBlock::new(&queue()).with_callback({
        let callbacks = Arc::clone(&callbacks);
        move |block| {
            assert_eq!(block.get_status(false), Ok(()));
            callbacks.fetch_add(1, Ordering::SeqCst);
        }
    });
    client
        .call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();

    let transport = client.transport();
    for _ in 0..500 {
        if transport.ready_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(block.get_status(false), Err(OpError::Pending));
    assert_eq!(transport.update(), Ok(0));

    block.wait_async().await.unwrap();
    for _ in 0..500 {
        if callbacks.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_waits_for_other_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            envelope(json!({"Time": "2026-10-19T12:00:00Z"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let client = client(&server, DeliveryMode::Threaded);
    let queue = queue();

    let other = client.clone();
    let block = AsyncBlock::new(&queue);
    assert_eq!(
        client.cleanup_async(&block),
        Err(OpError::ContextInUse { live: 1 })
    );
    drop(other);

    // An in-flight call holds a share until its response has been handled.
    let call = AsyncBlock::new(&queue);
    client
        .call::<ServerTime, _>(&call, "/Client/GetTime", &json!({}))
        .unwrap();
    let block = AsyncBlock::new(&queue);
    assert_eq!(
        client.cleanup_async(&block),
        Err(OpError::ContextInUse { live: 1 })
    );
    call.wait_async().await.unwrap();
    assert_eq!(client.other_references(), 0);

    let block = AsyncBlock::new(&queue);
    client.cleanup_async(&block).unwrap();
    block.wait_async().await.unwrap();
    assert!(client.is_closed());

    let late = AsyncBlock::new(&queue);
    assert!(matches!(
        client.call::<ServerTime, _>(&late, "/Client/GetTime", &json!({})),
        Err(OpError::Usage(_))
    ));
    let again = AsyncBlock::new(&queue);
    assert!(matches!(
        client.cleanup_async(&again),
        Err(OpError::Usage(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminated_queue_fails_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            envelope(json!({"Time": "2026-10-19T12:00:00Z"}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    let client = client(&server, DeliveryMode::Threaded);
    let queue = TaskQueue::new(QueueOptions::manual_completion(), Handle::current());

    let block = AsyncBlock::new(&queue);
    client
        .call::<ServerTime, _>(&block, "/Client/GetTime", &json!({}))
        .unwrap();
    queue.terminate(false, None).unwrap();

    assert_eq!(block.wait_async().await, Err(OpError::QueueTerminated));
}
