mod environment;
mod seed;
mod shutdown;
mod tier;
mod types;

pub mod prelude {
    pub use crate::environment::{
        ensure_simcity_allowed, parse_allow_list, DeployEnvironment, EnvironmentError,
        DEPLOY_ENV_ENV, SIMCITY_ALLOWED_ENVS_ENV,
    };
    pub use crate::seed::{derive_run_id, Seed, SimRng};
    pub use crate::shutdown::{start_shutdown_listener, DelegatedShutdownListener, ShutdownHandle};
    pub use crate::tier::{Tier, UnknownTier};
    pub use crate::types::SimCityResult;
}
