pub mod backoff;
pub mod buf_ext;
pub mod fletcher;
pub mod random;
