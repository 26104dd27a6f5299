//! Generated from `proto/tron.proto` (the subset of the public Tron full-node
//! wire protocol this repository reads). See `build.rs`.

tonic::include_proto!("protocol");
