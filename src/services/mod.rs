pub mod acquirer;
pub mod archive;
pub mod assembler;
pub mod conversion;
pub mod error;
pub mod persistence;
pub mod preview;
pub mod source;
pub mod transfer;
