pub use self::{
    subgraph::{read_response, SourceClient, Subgraph},
    synchronization::{start_sync, RunOptions, SyncReport, Synchronization},
};

mod subgraph;
mod synchronization;

#[cfg(test)]
pub(crate) mod testing;
