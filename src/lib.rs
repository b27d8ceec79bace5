//! Thistle - broker-to-store event bridge
//!
//! Receives messages from an MQTT broker, records them durably in SQL, and
//! drives every stored record once through processing: fan-out to live
//! subscribers and optional republication to the broker.
//!
//! ```text
//! broker -> BrokerClient -> Ingestor -> MessageStore
//!                                            |
//!                                     MessageProcessor -> Broadcaster -> live streams
//!                                            |
//!                                            +-> BrokerClient::publish
//! ```

pub mod broadcast;
pub mod broker;
pub mod config;
pub mod http;
pub mod ingest;
pub mod processor;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod utils;
