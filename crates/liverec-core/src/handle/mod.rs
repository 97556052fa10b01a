mod background;
pub(crate) mod completion;
mod recording_handle;
mod save_operation;
mod save_status;

pub use {
    background::SaveReceiver, completion::CompletionDescriptor,
    recording_handle::RecordingHandle, save_status::SaveProgress, save_status::SaveStatus,
};
