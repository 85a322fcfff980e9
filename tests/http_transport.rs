//! End-to-end tests of `Session` over `HttpTransport` against a mock server.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use revchat::{
    AskRequest, Config, ConversationListParams, HttpTransport, NoopLogger, Session,
    SessionConfig, StreamEvent,
};

fn event_line(text: &str, conversation_id: &str, message_id: &str) -> String {
    let event = json!({
        "message": {"id": message_id, "content": {"content_type": "text", "parts": [text]}},
        "conversation_id": conversation_id,
    });
    format!("data: {event}\n\n")
}

fn event_stream(lines: &[String]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(lines.concat(), "text/event-stream")
}

fn session_for(server: &MockServer, config: SessionConfig) -> Session {
    let transport = HttpTransport::new(&server.uri(), "test-token", None).unwrap();
    Session::with_logger(transport, config, std::sync::Arc::new(NoopLogger))
}

fn json_body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

async fn collect(session: &mut Session, request: AskRequest) -> Vec<revchat::Result<StreamEvent>> {
    session.ask(request).await.unwrap().collect().await
}

#[tokio::test]
async fn streamed_answer_commits_and_generates_title() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "text/event-stream"))
        .respond_with(event_stream(&[
            event_line("Hel", "c1", "a1"),
            event_line("Hello!", "c1", "a1"),
            "data: [DONE]\n\n".to_string(),
        ]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/gen_title/c1"))
        .and(body_partial_json(json!({"message_id": "a1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Greeting"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        access_token: Some("test-token".to_string()),
        base_url: Some(server.uri()),
        ..Config::default()
    };
    let mut session = Session::from_config(&config, None).await.unwrap();

    let events = collect(&mut session, AskRequest::new("Say hello")).await;
    let texts: Vec<String> = events
        .into_iter()
        .map(|e| e.unwrap().message_text)
        .collect();
    assert_eq!(texts, vec!["Hel", "Hello!"]);
    assert_eq!(session.state().conversation_id().map(|c| c.as_str()), Some("c1"));
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("a1"));

    let requests = server.received_requests().await.unwrap();
    let ask = json_body(&requests[0]);
    assert_eq!(ask["action"], "next");
    assert_eq!(ask["conversation_id"], Value::Null);
    assert_eq!(ask["model"], "text-davinci-002-render-sha");
    assert_eq!(ask["messages"][0]["content"]["parts"][0], "Say hello");
    let title = json_body(&requests[1]);
    assert_eq!(title["model"], "text-davinci-002-render");
}

#[tokio::test]
async fn noise_lines_are_skipped() {
    let server = MockServer::start().await;
    let escaped = r#"data: {\"message\": {\"id\": \"a1\", \"content\": {\"parts\": [\"it\'s fine\"]}}, \"conversation_id\": \"c1\"}"#;
    Mock::given(method("POST"))
        .and(path("/api/conversation"))
        .respond_with(event_stream(&[
            "data: {partial\n\n".to_string(),
            format!("{escaped}\n\n"),
            "data: [DONE]\n\n".to_string(),
            event_line("after done", "c1", "a1"),
        ]))
        .mount(&server)
        .await;

    let config = SessionConfig::default().with_cursor(Some("c1".into()), Some("p1".into()));
    let mut session = session_for(&server, config);
    let events = collect(&mut session, AskRequest::new("hi")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].as_ref().unwrap().message_text, "it's fine");
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("a1"));
}

#[tokio::test]
async fn server_error_status_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let config = SessionConfig::default().with_cursor(Some("c1".into()), Some("p1".into()));
    let mut session = session_for(&server, config);
    let err = match session.ask(AskRequest::new("hi")).await {
        Ok(_) => panic!("expected an upstream error"),
        Err(err) => err,
    };
    assert!(err.is_upstream());
    assert_eq!(err.status_code(), Some(500));
    assert!(err.to_string().contains("Internal Server Error"));
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("p1"));
    assert_eq!(session.state().rollback_depth(), 1);
}

#[tokio::test]
async fn slow_answer_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation"))
        .respond_with(
            event_stream(&[event_line("late", "c1", "a1")]).set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = SessionConfig::default().with_cursor(Some("c1".into()), Some("p1".into()));
    let mut session = session_for(&server, config);
    let request = AskRequest::new("hi").with_timeout(Duration::from_millis(200));
    let err = match session.ask(request).await {
        Ok(_) => panic!("expected a timeout"),
        Err(err) => err,
    };
    assert!(err.is_timeout());
    assert!(err.is_transport());
}

// Reads one request, headers and body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

// Serves one chunked event stream, pausing `gap` before each chunk.
async fn trickle_server(chunks: Vec<String>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        for chunk in chunks {
            tokio::time::sleep(gap).await;
            let framed = format!("{:x}\r\n{chunk}\r\n", chunk.len());
            // The client may have hung up.
            if socket.write_all(framed.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn long_steady_answer_is_not_cut_off() {
    let mut chunks: Vec<String> = (0..6)
        .map(|n| event_line(&format!("t{n}"), "c1", &format!("a{n}")))
        .collect();
    chunks.push("data: [DONE]\n\n".to_string());
    let base_url = trickle_server(chunks, Duration::from_millis(300)).await;

    let transport = HttpTransport::new(&base_url, "test-token", None).unwrap();
    let config = SessionConfig::default().with_cursor(Some("c1".into()), Some("p1".into()));
    let mut session = Session::with_logger(transport, config, std::sync::Arc::new(NoopLogger));
    let request = AskRequest::new("tell me a story").with_timeout(Duration::from_secs(1));
    let texts: Vec<String> = collect(&mut session, request)
        .await
        .into_iter()
        .map(|e| e.unwrap().message_text)
        .collect();
    assert_eq!(texts, vec!["t0", "t1", "t2", "t3", "t4", "t5"]);
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("a5"));
}

#[tokio::test]
async fn stalled_answer_times_out_without_commit() {
    let chunks = vec![event_line("t0", "c1", "a0"), event_line("t1", "c1", "a1")];
    let base_url = trickle_server(chunks, Duration::from_secs(2)).await;

    let transport = HttpTransport::new(&base_url, "test-token", None).unwrap();
    let config = SessionConfig::default().with_cursor(Some("c1".into()), Some("p1".into()));
    let mut session = Session::with_logger(transport, config, std::sync::Arc::new(NoopLogger));
    let request = AskRequest::new("hi").with_timeout(Duration::from_millis(500));
    let events = collect(&mut session, request).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].as_ref().unwrap_err().is_timeout());
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("p1"));
}

#[tokio::test]
async fn lookup_then_list_history_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "c1", "title": "First"}],
            "total": 1,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "First",
            "current_node": "m2",
            "mapping": {
                "m1": {
                    "id": "m1",
                    "message": {
                        "id": "m1",
                        "author": {"role": "user"},
                        "content": {"content_type": "text", "parts": ["question"]}
                    },
                    "parent": null,
                    "children": ["m2"]
                },
                "m2": {
                    "id": "m2",
                    "message": {
                        "id": "m2",
                        "author": {"role": "assistant"},
                        "content": {"content_type": "text", "parts": ["answer"]}
                    },
                    "parent": "m1",
                    "children": []
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversation"))
        .and(body_partial_json(json!({"conversation_id": "c1", "parent_message_id": "m2"})))
        .respond_with(event_stream(&[
            event_line("more", "c1", "m3"),
            "data: [DONE]\n\n".to_string(),
        ]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/conversation/c1"))
        .and(body_partial_json(json!({"is_visible": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session_for(&server, SessionConfig::default());

    let events = collect(&mut session, AskRequest::new("go on").with_conversation("c1")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(session.state().parent_id().map(|m| m.as_str()), Some("m3"));

    let conversations = session
        .get_conversations(ConversationListParams::default())
        .await
        .unwrap();
    assert_eq!(conversations[0].title.as_deref(), Some("First"));

    let history = session.get_msg_history(&"c1".into()).await.unwrap();
    let thread: Vec<String> = history.thread().iter().map(|m| m.text()).collect();
    assert_eq!(thread, vec!["question", "answer"]);

    session.delete_conversation(&"c1".into()).await.unwrap();
    assert_eq!(session.state().conversation_id(), None);
    assert!(session.state().head(&"c1".into()).is_none());
}
