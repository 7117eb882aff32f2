pub mod action;
pub mod context;
pub mod db;
pub mod densemap;
pub mod error;
pub mod freshness;
pub mod fs;
pub mod graph;
pub mod layout;
pub mod load;
pub mod parse;
pub mod process;
pub mod progress;
pub mod run;
mod signal;
pub mod signature;
pub mod task;
mod terminal;
pub mod toolchain;
pub mod trace;
pub mod validate;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
