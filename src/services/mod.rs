//! Collaborator capabilities consumed by the blocks and the engine

pub mod ai;
pub mod mail;
pub mod media;
pub mod publish;
pub mod retry;

pub use ai::{OpenAiSummarizer, Summarizer, SummaryOptions};
pub use mail::{EmailMessage, LogMailer, Mailer};
pub use media::{FileDescriptor, LocalMediaStore, MediaStore};
pub use publish::{app_channel, BroadcastPublisher, Publisher};
