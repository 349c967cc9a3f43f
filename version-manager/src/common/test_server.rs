use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

/// Serves the routes registered by configure on a loopback port of the current actix system, and
/// returns the base URL, 'http://127.0.0.1:<port>'.
pub(crate) fn start<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Clone + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let server = HttpServer::new(move || App::new().configure(configure.clone()))
        .workers(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
    actix_web::rt::spawn(server);

    format!("http://{address}")
}
