pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_workers_table;
mod m20250301_000002_create_mining_pools_table;
mod m20250301_000003_create_wireguard_leases_table;
mod m20250301_000004_create_socks5_credentials_table;
mod m20250301_000005_create_challenge_response_table;

pub struct Migrator;

impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_workers_table::Migration),
            Box::new(m20250301_000002_create_mining_pools_table::Migration),
            Box::new(m20250301_000003_create_wireguard_leases_table::Migration),
            Box::new(m20250301_000004_create_socks5_credentials_table::Migration),
            Box::new(m20250301_000005_create_challenge_response_table::Migration),
        ]
    }
}
