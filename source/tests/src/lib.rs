//! Intentionally empty: this crate exists only to host integration tests
//! under `tests/` against `relaykeeper-config`'s public API.
