use std::sync::OnceLock;

use serde::Deserialize;

fn default_num_pes() -> usize {
    1
}

fn default_heap_size() -> usize {
    4 * 1024 * 1024
}

fn default_mem_slots() -> usize {
    2048
}

fn default_barrier_spin() -> usize {
    128
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Alloc {
    /// best-fit free lists with coalescing
    Btree,
    /// first-fit over an address ordered list
    Linear,
}

fn default_alloc() -> Alloc {
    Alloc::Btree
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Number of PEs spawned by [WorldBuilder::launch][crate::WorldBuilder::launch], default: 1
    #[serde(default = "default_num_pes")]
    pub num_pes: usize,

    /// Size in bytes of each PE's symmetric heap, default: 4 MiB
    #[serde(default = "default_heap_size")]
    pub heap_size: usize,

    /// The symmetric heap strategy, 'btree' (default) or 'linear'
    #[serde(default = "default_alloc")]
    pub alloc: Alloc,

    /// Maximum number of live symmetric allocations per PE, default: 2048
    #[serde(default = "default_mem_slots")]
    pub mem_slots: usize,

    /// Busy-spin iterations in a barrier wait before the waiter starts yielding, default: 128
    #[serde(default = "default_barrier_spin")]
    pub barrier_spin: usize,

    /// flag used to print a warning when blocks are still allocated at close. Default: true
    pub leak_warning: Option<bool>,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("XBRTIME_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
