//! transferindex-evm: ERC-20 Transfer decoding, the JSON-RPC chain source,
//! and the index loop.

pub mod builder;
pub mod decoder;
pub mod fetcher;
pub mod index_loop;
pub mod rpc;
pub mod source;
pub mod subscription;

pub use builder::IndexerBuilder;
pub use decoder::{decode_transfer, DecodedTransfer, TRANSFER_SIGNATURE};
pub use fetcher::RawLog;
pub use index_loop::IndexLoop;
pub use source::{derive_ws_url, EvmChainSource, EvmSourceConfig};
