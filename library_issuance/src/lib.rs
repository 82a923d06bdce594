pub mod api;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;

#[cfg(any(feature = "server", test))]
pub mod handlers;

#[cfg(any(feature = "server", test))]
pub mod issuance_ledger;

#[cfg(any(feature = "server", test))]
pub mod users_repository;
