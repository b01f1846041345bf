// Web server binary for the image describe service

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use image_describe::log_info;
use image_describe::web::config::ServerConfig;
use image_describe::web::inference_queue::InferenceQueue;
use image_describe::web::model_manager::{new_shared_state, ort_loader};
use image_describe::web::response_helpers::{cors_preflight, json_error, request_origin};
use image_describe::web::routes;

async fn handle_request(
    req: Request<Body>,
    queue: InferenceQueue,
    config: ServerConfig,
) -> Result<Response<Body>, Infallible> {
    let origin = request_origin(&req);

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => routes::health::handle_root(origin).await,

        (&Method::GET, "/health") => routes::health::handle(origin).await,

        (&Method::POST, "/process/image") => {
            routes::process::handle_post_image(req, queue, origin).await
        }

        (&Method::POST, "/process/image/stream") => {
            routes::process::handle_post_image_stream(req, queue, origin).await
        }

        (&Method::POST, "/process/folder") => {
            routes::process::handle_post_folder(req, queue, origin).await
        }

        (&Method::GET, "/process/folder/stream") => {
            routes::process::handle_get_folder_stream(req, queue, origin).await
        }

        (&Method::POST, "/preview/folder") => routes::preview::handle(req, origin).await,

        (&Method::GET, path) if path.starts_with("/image/") => {
            routes::image::handle(path, origin).await
        }

        (&Method::GET, "/model/status") => {
            routes::status::handle(queue.model_state().clone(), &config.model_dir, origin).await
        }

        (&Method::OPTIONS, _) => Ok(cors_preflight(origin)),

        _ => Ok(json_error(StatusCode::NOT_FOUND, origin, "Not Found")),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log_info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ServerConfig::from_env();
    log_info!(
        "Starting image describe web server (port {}, model dir {})",
        config.port,
        config.model_dir.display()
    );

    let model_state = new_shared_state();
    let queue = InferenceQueue::spawn(
        config.queue_depth,
        model_state,
        ort_loader(config.model_dir.clone()),
    );

    // Load the model up front so the first request doesn't pay for it
    queue.warmup().await;

    let make_svc = make_service_fn({
        let queue = queue.clone();
        let config = config.clone();
        move |_conn| {
            let queue = queue.clone();
            let config = config.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, queue.clone(), config.clone())
                }))
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = Server::bind(&addr).serve(make_svc);
    let graceful = server.with_graceful_shutdown(shutdown_signal());

    println!("Image describe web server listening on http://{addr}");
    println!("Available endpoints:");
    println!("  GET  /health                  - Health check");
    println!("  POST /process/image           - Describe one uploaded image");
    println!("  POST /process/image/stream    - Same, with JSON-lines progress");
    println!("  POST /process/folder          - Describe a folder of images");
    println!("  GET  /process/folder/stream   - Same, with SSE progress");
    println!("  POST /preview/folder          - List images a folder job would pick up");
    println!("  GET  /image/{{path}}            - Serve raw image bytes");
    println!("  GET  /model/status            - Model lifecycle status");

    let served = graceful.await;

    // Release device memory before exiting
    queue.shutdown().await;
    log_info!("Server stopped");

    served.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}
