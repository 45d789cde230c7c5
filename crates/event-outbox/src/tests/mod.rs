//! Behavioural tests for the dispatch queue.
//!
//! - `harness.rs`   - scripted transport, recording beacon and failure sink
//! - `ordering.rs`  - enqueue order, one submission in flight
//! - `retry.rs`     - transient retry, backoff, permanent drop, capacity
//! - `unload.rs`    - teardown flush through the beacon
//! - `readiness.rs` - transport that never becomes ready
