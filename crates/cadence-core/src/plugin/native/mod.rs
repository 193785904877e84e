//! Native Rust plugin instances
//!
//! These are hosted through the same [`PluginInstance`] seam as any external
//! plugin format and are always available in the registry.

mod delay;
mod gain;
mod lowpass;

use std::sync::Arc;

pub use delay::FeedbackDelay;
pub use gain::NativeGain;
pub use lowpass::OnePoleLowpass;

pub use delay::URI as DELAY_URI;
pub use gain::URI as GAIN_URI;
pub use lowpass::URI as LOWPASS_URI;

use super::hosted::{InstanceConstructor, PluginInstance};

/// Constructors for every built-in instance, keyed by URI
pub fn native_instances() -> Vec<(&'static str, InstanceConstructor)> {
    vec![
        (GAIN_URI, constructor(NativeGain::new)),
        (LOWPASS_URI, constructor(OnePoleLowpass::new)),
        (DELAY_URI, constructor(FeedbackDelay::new)),
    ]
}

fn constructor<P: PluginInstance + 'static>(make: fn() -> P) -> InstanceConstructor {
    Arc::new(move || -> Box<dyn PluginInstance> { Box::new(make()) })
}
