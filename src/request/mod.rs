//! Request execution: one in-flight request per key, constant-delay retries
//! for transient failures, cooperative cancellation.

mod descriptor;
mod manager;
mod registry;
mod state;
mod transport;

pub use descriptor::{
  RequestDescriptor, RequestKey, SupersedeScope, DEFAULT_RETRY, DEFAULT_RETRY_DELAY,
  DEFAULT_TIMEOUT,
};
pub use manager::RequestManager;
pub use registry::{InFlightGuard, InFlightRegistry};
pub use state::{InvalidTransition, RequestState};
pub use transport::{
  extract_detail, HttpTransport, OutgoingRequest, Transport, REQUEST_ID_HEADER,
  REQUEST_TIMESTAMP_HEADER,
};
