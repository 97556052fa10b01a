mod recorder;
mod session_state;
pub(crate) mod shared;

pub use {recorder::Recorder, session_state::SessionState};
