//! Wire bridge between the bus and the worker's stdio streams.
//!
//! # Architecture
//!
//! - **protocol**: command lines understood by the worker
//! - **codec**: newline framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
