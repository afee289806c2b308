// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RouterOS API client plumbing.
//!
//! - [`sentence`]: words, replies, tags and request builders
//! - [`codec`]: the length-prefixed wire encoding
//! - [`connection`]: dialing, login and serialized writes

pub mod codec;
pub mod connection;
pub mod sentence;

pub use codec::{SentenceReader, SentenceWriter};
pub use connection::{
    BoxedReader, BoxedWriter, Credentials, DeviceConnection, Dialer, TcpDialer,
};
pub use sentence::{Command, Marker, Reply, Sentence, TagClass, FETCH_TAG, LISTEN_TAG};
