//! Zguby DB - the publication ledger on PostgreSQL.

pub mod repository;

pub use repository::LedgerRepository;
