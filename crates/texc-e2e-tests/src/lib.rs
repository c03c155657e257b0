//! End-to-end tests for the texc pipeline live under `tests/`.
