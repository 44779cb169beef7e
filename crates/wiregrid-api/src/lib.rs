//! wiregrid-api — HTTP boundary of the grid.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/wd/hub/session` | Create a session on a free node |
//! | any | `/wd/hub/session/{id}` | Session call, forwarded to the owning node |
//! | any | `/wd/hub/session/{id}/{*rest}` | Session call, forwarded to the owning node |
//! | POST | `/grid/register` | Register or refresh a node |
//! | GET | `/grid/api/nodes` | List nodes and their reservation state |
//! | GET | `/metrics` | Prometheus exposition (path configurable, optional) |

pub mod handlers;

use axum::Router;
use axum::routing::{any, get, post};
use tokio_util::sync::CancellationToken;

use wiregrid_core::{GridSection, MetricsConfig};
use wiregrid_pool::NodePool;
use wiregrid_proxy::{Dispatcher, SessionRouter, SessionTransport};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: NodePool,
    pub dispatcher: Dispatcher,
    pub sessions: SessionRouter,
    /// Cancelled on shutdown; every create-session call listens to a child.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(pool: NodePool, grid: &GridSection, shutdown: CancellationToken) -> Self {
        let transport = SessionTransport::new(grid.session_create_timeout);
        Self {
            dispatcher: Dispatcher::new(pool.clone(), grid.session_create_timeout),
            sessions: SessionRouter::new(pool.clone(), transport),
            pool,
            shutdown,
        }
    }
}

/// Build the complete router (protocol + grid API + metrics).
pub fn build_router(state: ApiState, metrics: &MetricsConfig) -> Router {
    let mut router = Router::new()
        .route("/wd/hub/session", any(handlers::create_session))
        .route("/wd/hub/session/{id}", any(handlers::session_call))
        .route("/wd/hub/session/{id}/{*rest}", any(handlers::session_call))
        .route("/grid/register", post(handlers::register_node))
        .route("/grid/api/nodes", get(handlers::list_nodes));

    if metrics.enable {
        router = router.route(&metrics.path, get(handlers::prometheus_metrics));
    }

    router.with_state(state)
}
