/// HTTP-level tests for the streaming endpoint
///
/// Covers:
/// - capability and authentication rejections
/// - stream headers and CORS origin handling
/// - frame delivery, supersede and shutdown through a real actix service
/// - status routes
/// - release of a stream whose client hung up, over a real socket
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    body::{BoxBody, MessageBody},
    http::{header, StatusCode, Version},
    test, web, App, HttpServer,
};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use notification_relay::{
    broker::{Broker, BrokerConfig},
    handlers::{self, ServiceInfo, StreamState},
    ChannelId, DispatchEvent, Message, QueryTokenAuthenticator,
};

const WAIT: Duration = Duration::from_secs(2);

fn app_state(broker: &Broker) -> (web::Data<StreamState>, web::Data<ServiceInfo>) {
    (
        web::Data::new(StreamState::new(
            broker.clone(),
            Arc::new(QueryTokenAuthenticator),
        )),
        web::Data::new(ServiceInfo::new("9.9.9")),
    )
}

async fn next_chunk(body: &mut BoxBody) -> Option<Bytes> {
    timeout(WAIT, poll_fn(|cx| Pin::new(&mut *body).poll_next(cx)))
        .await
        .expect("timed out waiting for body chunk")
        .map(|chunk| chunk.expect("body error"))
}

async fn push(broker: &Broker, channel: &str, topic: &str, data: &str) {
    broker
        .submit(
            DispatchEvent::new(ChannelId::from(channel), Message::new(topic, data)),
            WAIT,
        )
        .await
        .expect("submit");
}

#[actix_web::test]
async fn test_missing_token_is_unauthorized() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    for uri in ["/", "/?token="] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"Unauthorized");
    }

    assert_eq!(broker.live_connections(), 0);
}

#[actix_web::test]
async fn test_http10_client_gets_not_implemented() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    // checked before authentication
    let req = test::TestRequest::get()
        .uri("/")
        .version(Version::HTTP_10)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"Streaming unsupported!");
    assert_eq!(broker.live_connections(), 0);
}

#[actix_web::test]
async fn test_stream_headers_echo_origin() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/?token=u1")
        .insert_header((header::ORIGIN, "https://app.example.com"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let headers = resp.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(headers.get(header::CONNECTION).unwrap(), "keep-alive");
    assert_eq!(headers.get("X-Accel-Buffering").unwrap(), "no");
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://app.example.com"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
        handlers::sse::ALLOW_METHODS
    );
}

#[actix_web::test]
async fn test_missing_origin_allows_any() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/?token=u1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}

#[actix_web::test]
async fn test_pushed_message_arrives_as_frame() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/?token=u1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(broker.live_connections(), 1);
    let mut body = resp.into_body();

    push(&broker, "u2", "evt", "not-for-u1").await;
    push(&broker, "u1", "evt", "hello").await;
    push(&broker, "u1", "evt", "world").await;

    assert_eq!(
        next_chunk(&mut body).await.unwrap(),
        Bytes::from_static(b"event: message\ndata: {\"topic\":\"evt\",\"data\":\"hello\"}\n\n")
    );
    assert_eq!(
        next_chunk(&mut body).await.unwrap(),
        Bytes::from_static(b"event: message\ndata: {\"topic\":\"evt\",\"data\":\"world\"}\n\n")
    );

    // peer disconnect
    drop(body);
    assert_eq!(broker.live_connections(), 0);
}

#[actix_web::test]
async fn test_second_connection_supersedes_first() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let first = test::call_service(&app, test::TestRequest::get().uri("/?token=u1").to_request()).await;
    let mut first = first.into_body();
    let second = test::call_service(&app, test::TestRequest::get().uri("/?token=u1").to_request()).await;
    let mut second = second.into_body();

    // the older stream ends without a frame
    assert!(next_chunk(&mut first).await.is_none());
    assert_eq!(broker.live_connections(), 1);

    push(&broker, "u1", "evt", "latest").await;
    assert_eq!(
        next_chunk(&mut second).await.unwrap(),
        Bytes::from_static(b"event: message\ndata: {\"topic\":\"evt\",\"data\":\"latest\"}\n\n")
    );
}

#[actix_web::test]
async fn test_shutdown_ends_open_streams() {
    let (broker, core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/?token=u1").to_request()).await;
    let mut body = resp.into_body();

    push(&broker, "u1", "evt", "before").await;
    assert!(next_chunk(&mut body).await.is_some());

    broker.shutdown();
    assert!(next_chunk(&mut body).await.is_none());
    assert_eq!(broker.live_connections(), 0);
    timeout(WAIT, core).await.unwrap().unwrap();

    // no new streams once the broker is gone
    let resp = test::call_service(&app, test::TestRequest::get().uri("/?token=u2").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[actix_web::test]
async fn test_status_routes() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let (stream_state, info) = app_state(&broker);
    let app = test::init_service(
        App::new()
            .app_data(stream_state)
            .app_data(info)
            .configure(handlers::register_routes),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&test::read_body(resp).await[..], b"OK");

    let version: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/version").to_request(),
    )
    .await;
    assert_eq!(version["version"], "9.9.9");
    assert_eq!(version["service"], "notification-relay");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_closed_client_is_released_while_idle() {
    let (broker, _core) = Broker::start(BrokerConfig::default());
    let stream_state = StreamState::new(broker.clone(), Arc::new(QueryTokenAuthenticator))
        .with_keep_alive(Duration::from_millis(50));
    let info = ServiceInfo::new("9.9.9");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(stream_state.clone()))
            .app_data(web::Data::new(info.clone()))
            .configure(handlers::register_routes)
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .expect("bind test listener");
    let addr = server.addrs()[0];
    let server = server.run();
    let server_handle = server.handle();
    actix_web::rt::spawn(server);

    let mut client = TcpStream::connect(addr).await.expect("connect");
    client
        .write_all(b"GET /?token=u1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 1024];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert!(buf[..n].starts_with(b"HTTP/1.1 200 OK"));
    assert_eq!(broker.live_connections(), 1);

    // hang up without any message ever being pushed to u1
    drop(client);

    let released = timeout(Duration::from_secs(5), async {
        while broker.live_connections() > 0 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "closed client still counted as live");

    server_handle.stop(false).await;
}
