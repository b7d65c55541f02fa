mod state;
mod store;
mod types;

pub use state::CheckpointState;
pub use store::{
    CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ResumeClaim,
};
pub use types::{Address, Checkpoint};
