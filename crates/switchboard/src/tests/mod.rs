//! Test suites for the dispatcher.

pub(crate) mod support;
