//! End-to-end tests at the HTTP request/response level.
//!
//! Each test file covers a specific scenario, driving the full router with
//! a manual clock so window and expiry behaviour is deterministic.

#![cfg(test)]

mod helpers;

mod test_admin_bootstrap;
mod test_credential_lifecycle;
mod test_fail_open;
mod test_rate_limit_headers;
mod test_scope_scenario;
mod test_unauthenticated;
