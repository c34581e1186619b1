// Life of a request:
// 1. Request arrives on a gated route
// 2. Bearer token (if any) is decoded and verified
// 3. Tokens minted for an API key are refused unless the key is known and active
// 4. Required permission level and guild/channel scope are checked
// 5. The rate-limit window for `prefix:principal:route` is checked and recorded
// 6. Admitted: principal is attached and the handler runs
//    Rejected: 401 / 403 / 429 with rate-limit headers, plus an audit event
//
// System components:
//  - Token codec
//  - Permission model
//  - Rate-limit store (over an in-process or Redis window backend)
//  - Authentication gate
//  - Audit sink
//  - Credential registry (over an in-process or Redis credential store)

pub mod audit;
pub mod auth;
pub mod config;
pub mod gate;
pub mod ratelimit;
pub mod server;
pub mod shared_store;
pub mod time;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use gate::{Admission, AuthenticationGate, GateSettings, Rejection, RoutePolicy};
