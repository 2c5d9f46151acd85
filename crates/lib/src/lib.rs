//! Wellchat core library: the streaming chat relay, the conversation session controller
//! and the model-service status prober, shared by the CLI.

pub mod config;
pub mod init;
pub mod llm;
pub mod prompt;
pub mod relay;
pub mod session;
pub mod status;
