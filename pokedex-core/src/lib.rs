#![allow(clippy::new_without_default)]

pub mod app;
pub mod data;
pub mod error;
pub mod webapi;
