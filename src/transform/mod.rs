pub mod engine;
pub mod fixation;
pub mod watcher;

pub use engine::{DocumentTransformer, FixationMark, PassReport};
pub use watcher::MutationWatcher;
