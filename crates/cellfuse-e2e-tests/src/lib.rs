//! End-to-end tests for cellfuse live under `tests/`; graph fixtures under
//! `fixtures/`.
