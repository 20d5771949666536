pub mod addresses;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod keypairs;
pub mod logger;
pub mod network;
pub mod provisioning;
pub mod queries;
pub mod quota;
pub mod state_machine;
pub mod termination;
pub mod views;
pub mod volumes;

pub use config::{ControllerConfig, QuotaDefaults};
pub use controller::CloudController;
pub use error::{ControllerError, ControllerResult};
pub use http::create_router;
pub use provisioning::RunInstancesRequest;
pub use volumes::{CreateVolumeRequest, UpdateDisplayRequest};
