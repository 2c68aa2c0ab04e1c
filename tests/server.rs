use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use http::header::{CONNECTION, HeaderValue, UPGRADE};
use hyper_util::rt::TokioIo;
use spritz::{ConnState, Context, Dispatcher, Options, Params, context_handler_fn, handler_fn, middleware_fn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

/// Splits a raw response into its head and decoded body.
fn split(resp: &str) -> (&str, String) {
    let (head, rest) = resp.split_once("\r\n\r\n").expect("complete response head");
    if !head.to_ascii_lowercase().contains("transfer-encoding: chunked") {
        return (head, rest.to_owned());
    }
    let mut body = String::new();
    let mut rest = rest;
    while let Some((size, tail)) = rest.split_once("\r\n") {
        let size = usize::from_str_radix(size.trim(), 16).expect("chunk size");
        if size == 0 {
            break;
        }
        body.push_str(&tail[..size]);
        rest = &tail[size + 2..];
    }
    (head, body)
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

fn app() -> Dispatcher {
    Dispatcher::new()
        .middleware("/users", middleware_fn(|cx, w, req, next| {
            let _ = w.write(b"start:");
            next.run(cx, w, req);
            let _ = w.write(b":end");
        }))
        .get("/users/{id}", context_handler_fn(|cx, w, _req| {
            let id = cx.value::<Params>().and_then(|p| p.get("id")).unwrap_or("none");
            let _ = w.write(id.as_bytes());
        }))
        .post("/echo", handler_fn(|w, req| {
            w.set_status(StatusCode::CREATED);
            let _ = w.write(req.body());
        }))
}

#[tokio::test]
async fn serves_until_root_context_is_cancelled() {
    let (root, cancel) = Context::background().with_cancel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(app().with_context(root).serve_listener(listener, Options::default()));

    let resp = send(addr, &get("/users/42")).await;
    let (head, body) = split(&resp);
    assert!(head.starts_with("HTTP/1.1 200 OK"), "{resp}");
    assert_eq!(body, "start:42:end");

    let resp = send(addr, "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
    let (head, body) = split(&resp);
    assert!(head.starts_with("HTTP/1.1 201 Created"), "{resp}");
    assert_eq!(body, "hello");

    let resp = send(addr, &get("/missing")).await;
    let (head, body) = split(&resp);
    assert!(head.starts_with("HTTP/1.1 404 Not Found"), "{resp}");
    assert_eq!(body, "404 page not found\n");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stopped after root cancellation")
        .unwrap()
        .unwrap();

    // the listener is gone
    assert!(TcpStream::connect(addr).await.is_err());
}

/// Polls `check` until it holds, failing after two seconds.
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn listen_limit_holds_back_extra_connections() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let release = Arc::new(AtomicBool::new(false));

    let app = app().get("/hold", handler_fn({
        let release = Arc::clone(&release);
        move |w, _req| {
            for _ in 0..1000 {
                if release.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = w.write(b"held");
        }
    }));
    let options = Options {
        listen_limit: 1,
        conn_state: Some({
            let states = Arc::clone(&states);
            Arc::new(move |_peer: SocketAddr, state: ConnState| states.lock().unwrap().push(state))
        }),
        ..Options::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = app.into_server(options);
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.serve(listener));

    let accepted = |states: &Mutex<Vec<ConnState>>| {
        states.lock().unwrap().iter().filter(|&&s| s == ConnState::New).count()
    };

    let (hold, user) = (get("/hold"), get("/users/2"));
    let first = tokio::spawn(async move { send(addr, &hold).await });
    eventually(|| states.lock().unwrap().contains(&ConnState::Active)).await;

    // the only slot is taken, so the second connection is not accepted
    let second = tokio::spawn(async move { send(addr, &user).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted(&states), 1);
    assert!(!second.is_finished());

    release.store(true, Ordering::SeqCst);
    assert_eq!(split(&first.await.unwrap()).1, "held");
    assert_eq!(split(&second.await.unwrap()).1, "start:2:end");
    assert_eq!(accepted(&states), 2);

    assert!(handle.stop());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn upgraded_connection_is_handed_to_the_handler() {
    let app = Dispatcher::new().get("/raw", handler_fn(|w, _req| {
        let Ok(upgrade) = w.hijack() else {
            w.set_status(StatusCode::BAD_REQUEST);
            return;
        };
        w.headers_mut().insert(CONNECTION, HeaderValue::from_static("upgrade"));
        w.headers_mut().insert(UPGRADE, HeaderValue::from_static("raw"));
        w.set_status(StatusCode::SWITCHING_PROTOCOLS);

        tokio::runtime::Handle::current().spawn(async move {
            if let Ok(upgraded) = upgrade.await {
                let mut io = TokioIo::new(upgraded);
                let _ = io.write_all(b"RAWDATA").await;
                let _ = io.shutdown().await;
            }
        });
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = app.into_server(Options::default());
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.serve(listener));

    let resp = send(addr, "GET /raw HTTP/1.1\r\nHost: localhost\r\nConnection: upgrade\r\nUpgrade: raw\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 101 Switching Protocols"), "{resp}");
    assert!(resp.ends_with("\r\n\r\nRAWDATA"), "{resp}");

    // without an upgrade request there is nothing to take over
    let resp = send(addr, &get("/raw")).await;
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request"), "{resp}");

    assert!(handle.stop());
    task.await.unwrap().unwrap();
}
