use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::{GraphQLRequest, RequestContext};

type ResponseBody = BoxBody<Bytes, hyper::Error>;

fn full<T: Into<Bytes>>(value: T) -> ResponseBody {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - stitchgate</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      const headers = { 'Content-Type': 'application/json' };
      if (token) {
        headers['Authorization'] = `Bearer ${token}`;
      }
      return fetch('__GRAPHQL_PATH__', {
        method: 'post',
        headers,
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

/// Externally visible server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Serving,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Serving => "serving",
            LifecycleState::Stopped => "stopped",
        }
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), GatewayError>>,
}

enum State {
    Uninitialized,
    Initializing,
    Serving(Running),
    Stopped,
}

impl State {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            State::Uninitialized => LifecycleState::Uninitialized,
            State::Initializing => LifecycleState::Initializing,
            State::Serving(_) => LifecycleState::Serving,
            State::Stopped => LifecycleState::Stopped,
        }
    }
}

/// Owns the listening socket and the composed gateway behind it.
///
/// `initialize` introspects the upstreams, composes the schema and starts
/// accepting connections; `close` stops accepting and waits for in-flight
/// connections to finish.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Mutex<State>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        GatewayServer {
            config,
            state: Mutex::new(State::Uninitialized),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        self.state.lock().await.lifecycle()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            State::Serving(running) => Some(running.addr),
            _ => None,
        }
    }

    /// Starts serving and returns the bound address. Calling it again while
    /// serving returns the same address.
    pub async fn initialize(&self) -> Result<SocketAddr, GatewayError> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                State::Serving(running) => return Ok(running.addr),
                State::Uninitialized => *state = State::Initializing,
                other => {
                    return Err(GatewayError::Lifecycle {
                        operation: "initialize",
                        state: other.lifecycle().as_str(),
                    });
                }
            }
        }

        match self.start().await {
            Ok(running) => {
                let addr = running.addr;
                *self.state.lock().await = State::Serving(running);
                info!("Server ready at http://{addr}{}", self.config.graphql_path);
                Ok(addr)
            }
            Err(e) => {
                *self.state.lock().await = State::Stopped;
                error!(error = %e, "gateway failed to start");
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<Running, GatewayError> {
        self.config.validate()?;
        let gateway = Gateway::connect(&self.config).await?;

        let bind_addr = self.config.listen_address;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: bind_addr,
                source,
            })?;
        let addr = listener.local_addr().map_err(GatewayError::Server)?;

        let routes = Arc::new(Routes {
            gateway,
            graphql_path: self.config.graphql_path.clone(),
        });
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(serve(listener, routes, signal));

        Ok(Running {
            addr,
            shutdown,
            task,
        })
    }

    /// Stops accepting connections and drains the open ones.
    pub async fn close(&self) -> Result<(), GatewayError> {
        let running = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Serving(running) => running,
                other => {
                    let current = other.lifecycle();
                    *state = other;
                    return Err(GatewayError::Lifecycle {
                        operation: "close",
                        state: current.as_str(),
                    });
                }
            }
        };

        let _ = running.shutdown.send(true);
        let result = running
            .task
            .await
            .map_err(|e| GatewayError::Server(std::io::Error::other(e)))?;
        info!(addr = %running.addr, "server stopped");
        result
    }
}

async fn serve(
    listener: TcpListener,
    routes: Arc<Routes>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    // Every connection task holds a sender; `recv` returns once all are gone.
    let (open_tx, mut open_rx) = mpsc::channel::<()>(1);

    let result = loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => break Err(GatewayError::Server(e)),
            },
        };

        let io = TokioIo::new(stream);
        let routes = Arc::clone(&routes);
        let mut shutdown = shutdown.clone();
        let open = open_tx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let routes = Arc::clone(&routes);
                async move { routes.handle(req).await }
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(io, service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    served = conn.as_mut() => {
                        if let Err(e) = served {
                            debug!(%peer, error = %e, "connection closed with error");
                        }
                        break;
                    }
                    _ = shutdown.changed(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
            drop(open);
        });
    };

    drop(open_tx);
    let _ = open_rx.recv().await;
    result
}

struct Routes {
    gateway: Gateway,
    graphql_path: String,
}

impl Routes {
    async fn handle(&self, req: Request<Incoming>) -> Result<Response<ResponseBody>, Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::POST, path) if path == self.graphql_path => self.graphql(req).await,

            (&Method::GET, "/graphiql") => Response::builder()
                .header(CONTENT_TYPE, "text/html")
                .header("Access-Control-Allow-Origin", "*")
                .body(full(GRAPHIQL_HTML.replace("__GRAPHQL_PATH__", &self.graphql_path)))
                .unwrap_or_else(|_| internal_server_error()),

            (&Method::GET, "/") => Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, "/graphiql")
                .header("Access-Control-Allow-Origin", "*")
                .body(full(""))
                .unwrap_or_else(|_| internal_server_error()),

            (&Method::OPTIONS, _) => Response::builder()
                .header("Access-Control-Allow-Origin", "*")
                .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
                .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
                .body(full(""))
                .unwrap_or_else(|_| internal_server_error()),

            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header("Access-Control-Allow-Origin", "*")
                .body(full("Not Found"))
                .unwrap_or_else(|_| internal_server_error()),
        };

        Ok(response)
    }

    async fn graphql(&self, req: Request<Incoming>) -> Response<ResponseBody> {
        let context = RequestContext::new(req.headers().get(AUTHORIZATION).cloned());

        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({ "errors": [{ "message": "Failed to read request body" }] }).to_string(),
                );
            }
        };

        let request = match serde_json::from_slice::<GraphQLRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({ "errors": [{ "message": format!("Invalid JSON request: {e}") }] })
                        .to_string(),
                );
            }
        };

        let response = self.gateway.execute(request, context).await;
        match serde_json::to_string(&response) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                internal_server_error()
            }
        }
    }
}

fn json_response(status: StatusCode, body: String) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<ResponseBody> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_requires_a_running_server() {
        let server = GatewayServer::new(GatewayConfig::default());
        assert_eq!(server.state().await, LifecycleState::Uninitialized);

        let err = server.close().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot close while uninitialized");
        assert_eq!(server.state().await, LifecycleState::Uninitialized);
        assert_eq!(server.local_addr().await, None);
    }

    #[tokio::test]
    async fn failed_start_leaves_the_server_stopped() {
        let mut config = GatewayConfig::default();
        config.upstreams.data.routing_url = "http://127.0.0.1:9/graphql".to_string();
        config.upstreams.users.routing_url = "http://127.0.0.1:9/graphql".to_string();
        let server = GatewayServer::new(config);

        assert!(matches!(
            server.initialize().await,
            Err(GatewayError::Introspection { .. })
        ));
        assert_eq!(server.state().await, LifecycleState::Stopped);
        assert!(matches!(
            server.initialize().await,
            Err(GatewayError::Lifecycle { operation: "initialize", state: "stopped" })
        ));
    }
}
