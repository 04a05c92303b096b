use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::container::{ContainerRuntime, DanteDriver, WireGuardDriver};
use crate::error::Result;
use crate::federation::{FederationClient, TicketStore, ValidatorRegistry};
use crate::geo::GeoResolver;
use crate::lease::{Socks5LeaseStore, WireGuardLeaseStore};
use crate::pipeline::{RequestPipeline, WorkerPipeline};
use crate::probes::TunnelProber;
use crate::scoring::{MiningPoolScorer, WorkerScorer};
use crate::services::database::DatabaseService;
use crate::sync::LockRegistry;

/// Central coordinator for all node subsystems.
///
/// Composition root: every driver, store, registry, and scorer is built
/// here and shared behind `Arc`s. The container runtime and the tunnel
/// prober are injected so tests can substitute scripted mocks.
#[derive(Clone)]
pub struct Manager {
    config: Arc<Config>,
    database: Arc<DatabaseService>,
    locks: Arc<LockRegistry>,
    wireguard: Arc<WireGuardDriver>,
    dante: Arc<DanteDriver>,
    wg_leases: Arc<WireGuardLeaseStore>,
    socks_leases: Arc<Socks5LeaseStore>,
    validators: Arc<ValidatorRegistry>,
    tickets: Arc<TicketStore>,
    geo: Arc<GeoResolver>,
    client: Arc<FederationClient>,
    worker_scorer: Arc<WorkerScorer>,
    pool_scorer: Arc<MiningPoolScorer>,
    pipeline: Arc<RequestPipeline>,
}

impl Manager {
    pub fn new(
        config: Arc<Config>,
        database: Arc<DatabaseService>,
        runtime: Arc<dyn ContainerRuntime>,
        prober: Arc<dyn TunnelProber>,
    ) -> Result<Self> {
        let db = database.connection.clone();
        let locks = Arc::new(LockRegistry::new());
        let tickets = Arc::new(TicketStore::new());
        let validators = Arc::new(ValidatorRegistry::new());
        let geo = Arc::new(GeoResolver::new(&config.geo)?);

        let wireguard = Arc::new(WireGuardDriver::new(
            runtime.clone(),
            db.clone(),
            config.wireguard.clone(),
            config.server.public_host.clone(),
        ));
        let dante = Arc::new(DanteDriver::new(
            runtime,
            db.clone(),
            config.dante.clone(),
            config.server.public_host.clone(),
        ));

        let wg_leases = Arc::new(WireGuardLeaseStore::new(
            db.clone(),
            locks.clone(),
            wireguard.clone(),
            config.wireguard.clone(),
            config.priority_slots,
        ));
        let socks_leases = Arc::new(Socks5LeaseStore::new(
            db.clone(),
            locks.clone(),
            dante.clone(),
            config.priority_slots,
        ));

        let client = Arc::new(FederationClient::new(
            db.clone(),
            config.clone(),
            tickets.clone(),
            validators.clone(),
        )?);

        let worker_scorer = Arc::new(WorkerScorer::new(
            db.clone(),
            locks.clone(),
            client.clone(),
            prober,
            geo.clone(),
            config.clone(),
        ));
        let pool_scorer = Arc::new(MiningPoolScorer::new(
            db,
            locks.clone(),
            client.clone(),
            validators.clone(),
        ));

        let worker_pipeline = Arc::new(WorkerPipeline::new(
            wireguard.clone(),
            wg_leases.clone(),
            socks_leases.clone(),
            client.clone(),
        ));
        let pipeline = Arc::new(RequestPipeline::new(
            config.clone(),
            worker_pipeline,
            client.clone(),
        ));

        Ok(Self {
            config,
            database,
            locks,
            wireguard,
            dante,
            wg_leases,
            socks_leases,
            validators,
            tickets,
            geo,
            client,
            worker_scorer,
            pool_scorer,
            pipeline,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.database
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.database.connection
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn wireguard(&self) -> &Arc<WireGuardDriver> {
        &self.wireguard
    }

    pub fn dante(&self) -> &Arc<DanteDriver> {
        &self.dante
    }

    pub fn wg_leases(&self) -> &Arc<WireGuardLeaseStore> {
        &self.wg_leases
    }

    pub fn socks_leases(&self) -> &Arc<Socks5LeaseStore> {
        &self.socks_leases
    }

    pub fn validators(&self) -> &Arc<ValidatorRegistry> {
        &self.validators
    }

    pub fn tickets(&self) -> &Arc<TicketStore> {
        &self.tickets
    }

    pub fn geo(&self) -> &Arc<GeoResolver> {
        &self.geo
    }

    pub fn client(&self) -> &Arc<FederationClient> {
        &self.client
    }

    pub fn worker_scorer(&self) -> &Arc<WorkerScorer> {
        &self.worker_scorer
    }

    pub fn pool_scorer(&self) -> &Arc<MiningPoolScorer> {
        &self.pool_scorer
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("run_mode", &self.config.run_mode)
            .field("database", &self.database.url)
            .finish()
    }
}
