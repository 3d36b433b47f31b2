//! Sweep orchestration: candidate queue, batch scheduling with known-bug
//! suppression, outcome classification, result recording, persisted tracker
//! state and stop requests.

pub mod classify;
pub mod queue;
pub mod recorder;
pub mod schedule;
pub mod state;
pub mod stop;
pub mod sweep;

#[cfg(test)]
mod test_properties;
