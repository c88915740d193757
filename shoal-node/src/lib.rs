//! Shoal networking: registry server, fragment server, registry client and fetch orchestrator.

pub mod client;
pub mod config;
pub mod fetch;
pub mod registry;
pub mod server;
pub mod transfer;

pub use client::{ClientError, RegistryClient};
pub use config::Config;
pub use fetch::{
    run_download, seed_file, FetchError, FetchOrchestrator, FetchReport, FetchRequest,
    NoProgress, ProgressObserver,
};
pub use registry::{Registry, SharedPeerTable};
pub use server::{Advertisement, FragmentServer, SeedOptions, ServerError};
pub use transfer::{fetch_fragment, request_fragment_count, TransferError};
