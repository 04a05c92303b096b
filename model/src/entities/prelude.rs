pub use super::challenges::Entity as Challenges;
pub use super::mining_pools::Entity as MiningPools;
pub use super::socks::Entity as Socks;
pub use super::wireguard_leases::Entity as WireguardLeases;
pub use super::workers::Entity as Workers;
