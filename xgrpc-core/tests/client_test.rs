use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tonic::Code;
use tonic::service::Routes;
use xgrpc_core::Environment;
use xgrpc_core::client::{Client, InvokeError, InvokeOptions};
use xgrpc_core::connection::Connection;
use xgrpc_core::grpc::MessageLimits;
use xgrpc_core::observe::{CallObserver, CallOutcome, CallTags};
use xgrpc_core::reflection::{ReflectionClient, ReflectionResolveError};


const UNARY_ECHO: &str = "echo.EchoService/UnaryEcho";

fn echo_client(
    env: Environment,
    service: EchoServiceImpl,
) -> Client<EchoServiceServer<EchoServiceImpl>> {
    let mut client = Client::new(env);
    client.load(FILE_DESCRIPTOR_SET).unwrap();
    client.attach(
        Arc::new(Connection::new(
            "echo",
            EchoServiceServer::new(service),
            MessageLimits::default(),
        )),
        false,
    );
    client
}

#[derive(Debug, Default)]
struct RecordingObserver {
    calls: Mutex<Vec<(CallTags, CallOutcome)>>,
}

impl CallObserver for RecordingObserver {
    fn observe(&self, tags: &CallTags, outcome: &CallOutcome) {
        self.calls.lock().push((tags.clone(), *outcome));
    }
}

#[tokio::test]
async fn test_unary_call_returns_message_and_headers() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let response = client
        .invoke(
            UNARY_ECHO,
            json!({ "message": "hello" }),
            InvokeOptions::new().with_metadata("X-Request-Id", "42"),
        )
        .await
        .unwrap();

    assert!(response.is_ok());
    assert_eq!(response.message, Some(json!({ "message": "hello" })));
    assert_eq!(response.headers["x-request-id"], vec!["42".to_string()]);
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_leading_slash_is_optional() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let response = client
        .invoke(
            "/echo.EchoService/UnaryEcho",
            json!({ "message": "slash" }),
            InvokeOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.message, Some(json!({ "message": "slash" })));
}

#[tokio::test]
async fn test_server_status_is_reported_in_the_response() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let response = client
        .invoke(UNARY_ECHO, json!({ "message": "fail" }), InvokeOptions::new())
        .await
        .unwrap();

    assert_eq!(response.status, Code::FailedPrecondition);
    assert!(response.message.is_none());

    let error = response.error.unwrap();
    assert_eq!(error.code, Code::FailedPrecondition as i32);
    assert_eq!(error.message, "failing on request");
    assert_eq!(response.trailers["x-reason"], vec!["requested".to_string()]);
}

#[tokio::test]
async fn test_unknown_method_fails_without_calling_the_server() {
    let service = EchoServiceImpl::default();
    let client = echo_client(Environment::new(), service.clone());

    let err = client
        .invoke("echo.EchoService/Missing", json!({}), InvokeOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::MethodNotFound(path) if path == "/echo.EchoService/Missing"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_streaming_methods_are_rejected() {
    let service = EchoServiceImpl::default();
    let client = echo_client(Environment::new(), service.clone());

    let err = client
        .invoke(
            "echo.EchoService/ServerStreamingEcho",
            json!({ "message": "x" }),
            InvokeOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::Streaming(_)));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_unknown_request_fields_are_rejected() {
    let service = EchoServiceImpl::default();
    let client = echo_client(Environment::new(), service.clone());

    let err = client
        .invoke(UNARY_ECHO, json!({ "msg": "typo" }), InvokeOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::Encode(_)));
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_deadline_is_enforced() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let err = client
        .invoke(
            UNARY_ECHO,
            json!({ "message": "stall" }),
            InvokeOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::DeadlineExceeded(_)));
    assert_eq!(err.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_invoke_with_value_parses_the_options_bag() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let response = client
        .invoke_with_value(
            UNARY_ECHO,
            json!({ "message": "bag" }),
            json!({ "headers": { "x-request-id": "7" }, "timeout": 5000 }),
        )
        .await
        .unwrap();

    assert_eq!(response.headers["x-request-id"], vec!["7".to_string()]);

    let err = client
        .invoke_with_value(UNARY_ECHO, json!({}), json!({ "retries": 3 }))
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::Config(_)));
}

#[tokio::test]
async fn test_all_field_kinds_survive_a_call() {
    let client = echo_client(Environment::new(), EchoServiceImpl::default());

    let request = json!({
        "name": "sample",
        "big": "9007199254740993",
        "ubig": "18446744073709551615",
        "flag": true,
        "ratio": 0.5,
        "blob": "aGk=",
        "kind": "KIND_BETA",
        "inner": { "label": "in", "values": [1, 2, 3] },
        "items": [{ "label": "first", "values": [] }],
        "counters": { "a": "3" },
    });

    let response = client
        .invoke("echo.EchoService/Inspect", request.clone(), InvokeOptions::new())
        .await
        .unwrap();

    assert_eq!(response.message, Some(request));

    let request = json!({
        "name": "second",
        "big": "-5",
        "ubig": "7",
        "flag": false,
        "ratio": -2.25,
        "blob": "",
        "kind": "KIND_ALPHA",
        "inner": { "label": "", "values": [-1] },
        "items": [{ "label": "x", "values": [1] }, { "label": "y", "values": [] }],
        "counters": { "a": "-3", "b": "0" },
    });

    let response = client
        .invoke("echo.EchoService/Inspect", request.clone(), InvokeOptions::new())
        .await
        .unwrap();

    assert_eq!(response.message, Some(request));
}

#[tokio::test]
async fn test_observer_sees_every_call() {
    let observer = Arc::new(RecordingObserver::default());
    let env = Environment::new().with_observer(observer.clone());
    let client = echo_client(env, EchoServiceImpl::default());

    client
        .invoke(
            UNARY_ECHO,
            json!({ "message": "hi" }),
            InvokeOptions::new().with_tag("name", "greeting").with_tag("suite", "it"),
        )
        .await
        .unwrap();

    client
        .invoke(UNARY_ECHO, json!({ "message": "fail" }), InvokeOptions::new())
        .await
        .unwrap();

    let calls = observer.calls.lock();
    assert_eq!(calls.len(), 2);

    let (tags, outcome) = &calls[0];
    assert_eq!(tags.url, "echo/echo.EchoService/UnaryEcho");
    assert_eq!(tags.service, "echo.EchoService");
    assert_eq!(tags.method, "UnaryEcho");
    assert_eq!(tags.name, "greeting");
    assert_eq!(tags.user["suite"], "it");
    assert_eq!(outcome.status, Code::Ok);

    let (tags, outcome) = &calls[1];
    assert_eq!(tags.name, "/echo.EchoService/UnaryEcho");
    assert_eq!(outcome.status, Code::FailedPrecondition);
}

#[tokio::test]
async fn test_schema_is_loaded_through_reflection() {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();
    let routes = Routes::new(reflection).add_service(EchoServiceServer::new(EchoServiceImpl::default()));

    let mut client = Client::new(Environment::new());
    client.attach(
        Arc::new(Connection::new("echo", routes, MessageLimits::default())),
        false,
    );

    let methods = client.load_reflection(Duration::from_secs(5)).await.unwrap();

    assert!(methods.iter().all(|m| m.package == "echo"));
    assert!(
        methods
            .iter()
            .any(|m| m.full_method == "/echo.EchoService/UnaryEcho")
    );
    assert!(
        client
            .methods()
            .iter()
            .all(|m| !m.full_method.starts_with("/grpc.reflection."))
    );

    let response = client
        .invoke(UNARY_ECHO, json!({ "message": "reflected" }), InvokeOptions::new())
        .await
        .unwrap();

    assert_eq!(response.message, Some(json!({ "message": "reflected" })));
}

#[tokio::test]
async fn test_proto_files_are_compiled_and_merged() {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/protos/diamond");
    let mut client = Client::<tonic::transport::Channel>::new(Environment::new());

    let methods = client.load_files(&[dir], &["a.proto"]).unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].full_method, "/diamond.Diamond/Join");

    // Loading a file already pulled in as an import is a no-op.
    let methods = client.load_files(&[dir], &["d.proto", "b.proto"]).unwrap();
    assert!(methods.is_empty());

    let pool = client.store().pool();
    assert_eq!(pool.files().filter(|f| f.name() == "d.proto").count(), 1);
    assert!(pool.get_message_by_name("diamond.Left").is_some());
    assert!(pool.get_message_by_name("diamond.Right").is_some());

    // Earlier loads stay available next to later ones.
    client.load(FILE_DESCRIPTOR_SET).unwrap();
    assert_eq!(client.store().services(), ["diamond.Diamond", "echo.EchoService"]);
}

#[tokio::test]
async fn test_close_keeps_loaded_descriptors() {
    let mut client = echo_client(Environment::new(), EchoServiceImpl::default());

    client.close().await;

    assert!(!client.is_connected());
    assert!(!client.methods().is_empty());

    let err = client
        .invoke(UNARY_ECHO, json!({ "message": "x" }), InvokeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::NotConnected));
}

#[tokio::test]
async fn test_reflection_resolves_a_single_symbol() {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();
    let mut client = ReflectionClient::new(reflection);

    let services = client.list_services().await.unwrap();
    assert!(services.iter().any(|s| s == "echo.EchoService"));

    let fd_set = client
        .file_descriptor_set_by_symbol("echo.Sample")
        .await
        .unwrap();
    assert!(fd_set.file.iter().any(|f| f.name() == "echo.proto"));

    let err = client
        .file_descriptor_set_by_symbol("echo.Missing")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReflectionResolveError::ServerStreamFailure(status) if status.code() == Code::NotFound
    ));
}
