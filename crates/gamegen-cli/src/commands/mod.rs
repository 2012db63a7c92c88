//! CLI command implementations.

pub mod games;
pub mod jobs;

use clap::ValueEnum;
use gamegen_core::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Default,
    Alternate,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Default => Provider::Default,
            ProviderArg::Alternate => Provider::Alternate,
        }
    }
}
