// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`line_buffer`] turns raw output chunks into decoded lines.
//! - [`pipe`] is a non-blocking channel to one stream of a child.
//! - [`args`] builds argument lists with quoting and log visibility rules.
//! - [`process_group`] puts a child in its own group and signals it.
//! - [`child`] owns one OS process from spawn to reap.

pub mod args;
pub mod child;
pub mod line_buffer;
pub mod pipe;
pub mod process_group;

pub use args::{ArgFlags, ArgList, ArgVisibility, PairStyle, PathStyle};
pub use child::{ChildProcess, ProcessFlags, StreamMode};
pub use line_buffer::{Codepages, LineBuffer, TextEncoding};
pub use pipe::{AsyncProcessPipe, PipeRead, PipeState, PipeStream};
