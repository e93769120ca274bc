// Copyright 2025 Janek Bevendorff
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Record-level access to WARC and ARC web archives.
//!
//! A [`RecordStream`] reads records sequentially from plain, per-record gzipped or
//! whole-file gzipped input and reports the raw offset of every record, so an index can
//! later [`seek`](RecordStream::seek) straight to it. Record content is streamed lazily from
//! the archive and never read past the declared length.
//!
//! ```no_run
//! use warctools::{RecordStream, StreamConfig};
//!
//! let mut stream = RecordStream::open("crawl.warc.gz", StreamConfig::default())?;
//! while let Some(next) = stream.next_record() {
//!     let (offset, record) = next?;
//!     println!("{:?} {}", offset, String::from_utf8_lossy(record.type_name()));
//! }
//! # Ok::<(), warctools::Error>(())
//! ```
//!
//! [`RecordWriter`] is the write-side counterpart. The [`http`] module holds an incremental
//! HTTP/1.x parser for the payloads of `request` and `response` records.

#[macro_use]
extern crate log;

pub mod arc;
pub mod config;
pub mod detect;
pub mod error;
pub mod gz;
pub mod header;
pub mod http;
pub mod record;
pub mod stream;
pub mod warc;
pub mod writer;

pub use arc::{ArcFiledescRecord, ArcRecord};
pub use config::{Dialect, GzipMode, StreamConfig};
pub use error::{Error, ParseError, Result};
pub use header::{HeaderEncoding, HeaderMap};
pub use record::{ArchiveRecord, Content, ContentFile, RecordKind};
pub use stream::{ReadRecord, RecordStream, Records};
pub use warc::{WarcRecord, WarcRecordType};
pub use writer::{Compression, RecordWriter};
