//! SQLite database for the ez2boot catalog.

pub use ez2boot_core::db::DatabaseError;

ez2boot_core::define_database!(CatalogDatabase, "Catalog migrations complete");
