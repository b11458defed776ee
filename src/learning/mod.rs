pub mod store;
pub mod tuner;

pub use store::{FeedbackStore, PromptStore};
pub use tuner::{TuneParams, TuneSummary, Tuner};
