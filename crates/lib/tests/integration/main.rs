//! Integration tests for stager-lib.

mod common;
mod install_tests;
mod staging_tests;
