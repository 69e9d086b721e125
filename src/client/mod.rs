//! Classification client: the single network boundary of the harness.

pub mod http;
pub mod response;
