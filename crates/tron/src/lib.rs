pub mod address;
pub mod decode;
pub mod grpc;
pub mod protocol;

pub use address::TronAddress;
pub use decode::{DecodedCall, ParsedContract, Trc20Token, Trc20TokenTable, Trc20Transfer};
pub use grpc::TronGrpc;
