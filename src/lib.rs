//! Cylinder Fleet API Library
//!
//! Fleet allocation and truck inventory engine for cylinder delivery: order
//! weight estimation, truck capacity evaluation, best-fit allocation with
//! stock reservations, loading validation and warehouse/truck transfers.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod concurrency;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod services;
pub mod store;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{ServiceContainer, ServiceFactory};
use crate::store::{FleetStore, SeaOrmFleetStore};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub store: Arc<dyn FleetStore>,
    pub services: ServiceContainer,
}

impl AppState {
    /// Wires the services over an open connection.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
    ) -> Self {
        let store: Arc<dyn FleetStore> =
            Arc::new(SeaOrmFleetStore::from_config(db.clone(), &config));
        let factory = ServiceFactory::new(
            store.clone(),
            config.fleet.clone(),
            Some(event_sender.clone()),
        );

        Self {
            db,
            config,
            event_sender,
            store,
            services: ServiceContainer::new(&factory),
        }
    }

    /// Connects, migrates when configured to, and returns the state together
    /// with the receiving end of the event channel.
    pub async fn bootstrap(
        config: config::AppConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServiceError> {
        metrics::register_metrics();

        let db = db::establish_connection(&config).await?;
        db::check_connection(&db).await?;
        if config.auto_migrate {
            db::run_migrations(&db).await?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        info!(environment = %config.environment, "Fleet engine ready");
        Ok((Self::new(Arc::new(db), config, event_sender), event_rx))
    }
}
