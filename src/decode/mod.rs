//! Protocol decoders
//!
//! A decoder turns captured segments into completed events. HTTP decoding
//! can wait on the correlation store, so it is async; MySQL decoding is
//! synchronous and keeps its own per-connection state.

pub mod http;
pub mod mysql;
pub mod packet;

pub use http::{Direction, HttpDecoder, HttpRequest};
pub use mysql::{MysqlDecoder, MysqlStats, StatementStats};
pub use packet::{carve_packet, encode_packet, MysqlPacket, COM_QUERY};

use crate::config::{MonitorConfig, PortConfig, Protocol};
use crate::correlation::{CorrelationStore, WaitPolicy};
use crate::normalize::KeyFormat;
use std::sync::Arc;

/// Decoder for one watched port
#[derive(Clone)]
pub enum Decoder {
    Http(Arc<HttpDecoder>),
    Mysql(Arc<MysqlDecoder>),
}

impl Decoder {
    pub fn from_config(port: &PortConfig, config: &MonitorConfig) -> Self {
        match port.protocol {
            Protocol::Http => {
                let store = Arc::new(CorrelationStore::new(config.correlation.ttl()));
                let wait = WaitPolicy::new(
                    config.correlation.wait_attempts,
                    config.correlation.wait_interval(),
                );
                Decoder::Http(Arc::new(HttpDecoder::new(port.port, store, wait)))
            }
            Protocol::Mysql => Decoder::Mysql(Arc::new(MysqlDecoder::new(
                port.port,
                KeyFormat::parse(&config.mysql.key_format),
                config.mysql.max_buffered_bytes,
            ))),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Decoder::Http(_) => Protocol::Http,
            Decoder::Mysql(_) => Protocol::Mysql,
        }
    }
}
