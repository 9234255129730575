mod client;

pub use client::WebApi;

#[cfg(test)]
pub(crate) use client::install_for_tests;
