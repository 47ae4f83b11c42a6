//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one part of the link
//! against a scripted mock transport.  Nothing here needs a radio.

mod http_shim_tests;
mod lifecycle_tests;
mod mock_transport;
mod session_tests;
