//! History RPC surface over HTTP
//!
//! | route                                        | operation                        |
//! |----------------------------------------------|----------------------------------|
//! | `POST /rpc/GetDeviceAttributesHistory`       | merged multi-key history         |
//! | `POST /rpc/GetDeviceHistory`                 | newest rows plus total           |
//! | `POST /rpc/GetDeviceHistoryWithPageAndPage`  | cursor pagination                |
//! | `POST /rpc/GetDeviceKVDataWithNoAggregate`   | raw plot points                  |
//! | `POST /rpc/GetDeviceKVDataWithAggregate`     | windowed aggregate               |
//! | `GET /health`                                | liveness                         |
//! | `GET /metrics`                               | Prometheus text                  |

pub mod handlers;
pub mod service;
pub mod types;

pub use handlers::{build_router, AppState};
pub use service::{HistoryService, ServiceError};
pub use types::{Reply, STATUS_ERROR, STATUS_OK};
