//! Route sampling and price acquisition.
//!
//! - [`sampler::GeoSampler`]: rejection-samples a pickup/destination pair
//! - [`acquisition::AcquisitionStateMachine`]: fills the estimate form and scrapes prices
//! - [`interceptor::ResponseInterceptor`]: persists the directions payload on the side
//! - [`run_loop::RunLoop`]: ties them together, one page per iteration
pub mod acquisition;
pub mod geo;
pub mod interceptor;
pub mod run_loop;
pub mod sampler;

pub use acquisition::{AcquisitionSettings, AcquisitionStateMachine};
pub use geo::{Geodesic, SphericalEarth};
pub use interceptor::ResponseInterceptor;
pub use run_loop::{Backoff, RunLoop, RunStats};
pub use sampler::{GeoSampler, SamplerSettings};
