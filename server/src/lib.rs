pub mod cleanup;
pub mod config;
pub mod discord;
pub mod engine;
pub mod storage;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;
