pub mod cancel;
pub mod codec;
pub mod kv;
