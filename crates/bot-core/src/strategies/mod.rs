//! Bundled strategies and the request-to-strategy factory.

mod move_to;
mod torch;
mod tunnel;

pub use move_to::MoveToStrategy;
pub use torch::PlaceTorchStrategy;
pub use tunnel::TunnelStrategy;

use contracts::{BotConfig, StrategyRequest};

use crate::strategy::Strategy;

/// Build the strategy a [`StrategyRequest`] asks for.
pub fn build_strategy(request: &StrategyRequest, config: &BotConfig) -> Box<dyn Strategy> {
    match request {
        StrategyRequest::Tunnel {
            origin,
            dx,
            dz,
            length,
            torches,
        } => Box::new(TunnelStrategy::new(*origin, *dx, *dz, *length, *torches, config)),
        StrategyRequest::PlaceTorches => Box::new(PlaceTorchStrategy::new(config)),
        StrategyRequest::MoveTo { target } => Box::new(MoveToStrategy::new(*target, config)),
    }
}
