//! Shared harness for end-to-end gateway tests: a tiny upstream HTTP server
//! bound to an OS-assigned port and run on its own thread/runtime, mirroring
//! the way a real backend would sit behind the gateway. Not itself a test
//! file (`tests/common/mod.rs` is the cargo-recognized way to share helpers
//! across integration test binaries without compiling it as its own).

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use std::net::TcpListener;
use std::time::Duration;

/// Starts an upstream serving `handler` for every method/path and returns
/// its base URL (`http://127.0.0.1:<port>`). The server runs for the
/// lifetime of the test process; tests are short-lived so nothing tears
/// it down explicitly.
pub fn spawn_upstream<F>(handler: F) -> String
where
    F: Fn(HttpRequest) -> HttpResponse + Send + Sync + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind upstream test port");
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("failed to build upstream runtime");
        rt.block_on(async move {
            let handler = web::Data::new(handler);
            HttpServer::new(move || {
                let handler = handler.clone();
                App::new().default_service(web::route().to(
                    move |req: HttpRequest| {
                        let handler = handler.clone();
                        async move { (handler.get_ref())(req) }
                    },
                ))
            })
            .listen(listener)
            .expect("failed to attach upstream listener")
            .run()
            .await
            .expect("upstream server crashed");
        });
    });

    std::thread::sleep(Duration::from_millis(50));
    format!("http://127.0.0.1:{port}")
}
