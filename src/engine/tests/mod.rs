//! Engine test suite, organized by concern.
